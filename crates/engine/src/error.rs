//! Errors produced by the manager's builder and runtime API.

/// All the errors this crate can produce.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A node with this name is already registered.
    #[error("state '{name}' already exists")]
    StateAlreadyExists {
        /// The name that was already taken.
        name: String,
    },

    /// No node with this name is registered.
    #[error("state '{name}' does not exist")]
    StateDoesNotExist {
        /// The name that was looked up.
        name: String,
    },

    /// An edge with this name is already attached on the source node.
    #[error("edge '{edge}' already exists on state '{from}'")]
    EdgeAlreadyExists {
        /// The source node.
        from: String,
        /// The edge name.
        edge: String,
    },

    /// No edge with this name is attached on the source node.
    ///
    /// Reserved for future use: every construction-time operation that could
    /// reference a missing edge today instead reports
    /// [`Error::StateDoesNotExist`] or [`Error::EdgeAlreadyExists`].
    #[error("edge '{edge}' does not exist on state '{from}'")]
    EdgeDoesNotExist {
        /// The source node.
        from: String,
        /// The edge name.
        edge: String,
    },

    /// The channel offered for an edge could not be attached.
    ///
    /// Reserved for future use: a constructed `flume::Sender` is always
    /// valid, so the type system rules out the "nil channel" case this
    /// variant historically covered.
    #[error("invalid channel for edge '{edge}' on state '{from}'")]
    InvalidChannel {
        /// The source node.
        from: String,
        /// The edge name.
        edge: String,
    },

    /// The manager has no nodes and therefore cannot be started.
    #[error("manager '{name}' has no states")]
    EmptyGraph {
        /// The manager name.
        name: String,
    },

    /// The manager is already running.
    #[error("manager '{name}' is already running")]
    AlreadyRunning {
        /// The manager name.
        name: String,
    },

    /// The manager is not running.
    #[error("manager '{name}' is not running")]
    NotRunning {
        /// The manager name.
        name: String,
    },

    /// A requested pool size was not positive.
    #[error("manager '{name}' invalid pool size {size}")]
    InvalidSize {
        /// The manager name.
        name: String,
        /// The invalid size that was requested.
        size: i64,
    },

    /// The manager's configuration did not validate.
    #[error("configuration error for manager '{name}'")]
    Config {
        /// The manager name.
        name: String,
        /// The underlying validation error.
        #[source]
        source: config::Error,
    },
}

impl From<node::Error> for Error {
    fn from(err: node::Error) -> Self {
        match err {
            node::Error::EdgeAlreadyExists { node, edge } => Error::EdgeAlreadyExists { from: node, edge },
            node::Error::InvalidChannel { node, edge } => Error::InvalidChannel { from: node, edge },
        }
    }
}
