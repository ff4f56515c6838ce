use std::any::Any;
use std::sync::Arc;

use clap::Parser;
use conftree::{
    Component, ComponentContext, ConfigContainer, Notifee, Notification, ROOT_TYPE, Result,
    TYPE_PARAMETER,
};

#[derive(Debug, Parser)]
struct Args {
    #[arg(short, long, default_value = "2", help = "Number of robots to assemble")]
    robots: usize,
    #[arg(short, long, default_value = "100", help = "Base speed of the first robot")]
    speed: i32,
}

/// Declares its configured speed as a resource.
struct Robot {
    ctx: ComponentContext,
}

impl Component for Robot {
    fn context(&self) -> &ComponentContext {
        &self.ctx
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Reads the nearest "speed" resource while being configured and listens for
/// later changes.
struct Sensor {
    ctx: ComponentContext,
}

impl Notifee for Sensor {
    fn resource_changed(&self, notification: &Notification<'_>) {
        let path = self.ctx.group_path().unwrap_or_default();
        match notification.fetch::<i32>() {
            Ok(value) => println!("[{path}] {} -> {value:?}", notification.event()),
            Err(_) => println!("[{path}] {} (no value)", notification.event()),
        }
    }
}

impl Component for Sensor {
    fn context(&self) -> &ComponentContext {
        &self.ctx
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn as_notifee(self: Arc<Self>) -> Option<Arc<dyn Notifee>> {
        Some(self)
    }

    fn configure(&self) -> Result<()> {
        // Both robots declare "speed"; tree distance picks this sensor's own
        // robot
        let speed = self.ctx.resource::<i32>("speed")?;
        println!(
            "[{}] configured with speed {speed:?}",
            self.ctx.group_path()?
        );
        Ok(())
    }
}

fn typed_group(container: &ConfigContainer, group: &str, type_name: &str) -> Result<()> {
    container.create_group(group)?;
    container.add_parameter(group, TYPE_PARAMETER)?;
    container.set_parameter(group, TYPE_PARAMETER, type_name)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let container = ConfigContainer::new();

    container.register_component::<Robot, _>("Robot", &[ROOT_TYPE], true, |ctx| {
        let speed: i32 = ctx.parameter("speed")?.parse().unwrap_or_default();
        ctx.declare_resource("speed", speed)?;
        Ok(Robot { ctx })
    })?;
    container.register_component::<Sensor, _>("Sensor", &[ROOT_TYPE], false, |ctx| {
        ctx.add_notified_resource("speed")?;
        Ok(Sensor { ctx })
    })?;

    for idx in 0..args.robots {
        let robot = format!("robots/robot:{idx}");
        typed_group(&container, &robot, "Robot")?;
        container.add_parameter(&robot, "speed")?;
        container.set_parameter(&robot, "speed", &(args.speed + idx as i32).to_string())?;
        typed_group(&container, &format!("{robot}/sensor"), "Sensor")?;
    }

    for idx in 0..args.robots {
        container.build_component_dyn(&format!("robots/robot:{idx}"))?;
    }
    for idx in 0..args.robots {
        container.build_component::<Sensor>(&format!("robots/robot:{idx}/sensor"))?;
    }

    // Re-declaring a speed reaches only the subscribers of that robot
    for idx in 0..args.robots {
        let robot = container
            .build_component::<Robot>(&format!("robots/robot:{idx}"))?;
        robot
            .context()
            .declare_resource("speed", args.speed + 10 * (idx as i32 + 1))?;
    }

    container.destroy_all_components()?;
    Ok(())
}
