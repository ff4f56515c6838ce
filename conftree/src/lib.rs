//! Hierarchical configuration container with managed components and shared
//! resources.
//!
//! A [`ConfigContainer`] holds a tree of named groups and string parameters.
//! Groups can be bound to components: objects instantiated from registered
//! types and driven through an explicit lifecycle. Components exchange typed
//! values through a resource registry with synchronous change notifications;
//! when several components publish a resource under the same name, lookups
//! pick the owner closest in the tree to the requester.
//!
//! ```
//! use std::any::Any;
//! use std::sync::Arc;
//!
//! use conftree::{Component, ComponentContext, ConfigContainer, Result, ROOT_TYPE};
//!
//! struct Motor {
//!     ctx: ComponentContext,
//! }
//!
//! impl Component for Motor {
//!     fn context(&self) -> &ComponentContext {
//!         &self.ctx
//!     }
//!
//!     fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
//!         self
//!     }
//! }
//!
//! fn main() -> Result<()> {
//!     let container = ConfigContainer::new();
//!     container.register_component::<Motor, _>("Motor", &[ROOT_TYPE], true, |ctx| {
//!         Ok(Motor { ctx })
//!     })?;
//!     container.create_group("robot/motor")?;
//!     container.add_parameter("robot/motor", "type")?;
//!     container.set_parameter("robot/motor", "type", "Motor")?;
//!     let motor = container.build_component::<Motor>("robot/motor")?;
//!     assert_eq!(motor.context().type_name(), "Motor");
//!     Ok(())
//! }
//! ```

pub mod boundary;
pub mod component;
pub mod container;
pub mod error;
pub mod key;
pub mod notify;
pub mod observer;
pub mod path;
pub mod registry;
pub mod resource;
pub mod tree;

pub use component::{Component, ComponentContext, ComponentId, ComponentStatus};
pub use container::{CONTAINER_OWNER, ConfigContainer, TYPE_PARAMETER};
pub use error::{ConfigError, Result};
pub use notify::{Notifee, Notification, ResourceEvent};
pub use observer::ContainerObserver;
pub use registry::{ROOT_TYPE, TypeInfo};
pub use resource::{FromResource, GenericResource, ObservableObject, ResourceValue};
pub use tree::NodeId;
