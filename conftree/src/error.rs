use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised by the configuration container and its collaborators.
///
/// All of these are raised synchronously at the point of violation; a failed
/// mutating operation leaves the tree and the resource registry untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid group or parameter name: {0:?}")]
    InvalidName(String),

    #[error("group already exists: {0}")]
    GroupAlreadyExists(String),

    #[error("parameter already exists: {0}")]
    ParameterAlreadyExists(String),

    #[error("no such group: {0}")]
    GroupNotFound(String),

    #[error("no such parameter: {0}")]
    ParameterNotFound(String),

    #[error("nodes belong to disjoint trees")]
    NoCommonAncestor,

    #[error("cyclic dependency while building group {0}")]
    CyclicDependency(String),

    #[error(
        "type {type_name} configures in its constructor but ancestor {ancestor} \
         committed to separate-step configuration"
    )]
    IncompatibleConfigurationStrategy { type_name: String, ancestor: String },

    #[error("ancestor {ancestor} of type {type_name} is not registered")]
    AncestorNotRegistered { type_name: String, ancestor: String },

    #[error("component type {0} has no component among its ancestors")]
    ComponentHasNoParentComponent(String),

    #[error("component type not registered: {0}")]
    TypeNotRegistered(String),

    #[error("component type {0} is abstract and cannot be created")]
    TypeIsAbstract(String),

    #[error("cannot re-register type {type_name}: {reason}")]
    CannotReRegisterType {
        type_name: String,
        reason: &'static str,
    },

    #[error("component bound to group {0} has a different concrete type")]
    WrongComponentType(String),

    #[error("component type {0} does not receive change notifications")]
    NotifeeNotSupported(String),

    #[error("resource not declared: {0}")]
    ResourceNotDeclared(String),

    #[error("cannot resolve ambiguity for resource {name}: {count} candidates")]
    ResourceAmbiguous { name: String, count: usize },

    #[error("resource values can only be fetched during a non-deletion notification")]
    CannotFetchOutsideNotification,

    #[error("no descriptor for path {0}")]
    NotDescribed(String),

    #[error("the configuration container has been dropped")]
    ContainerGone,
}
