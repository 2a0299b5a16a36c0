//! External service integrations.

pub mod model_client {
    pub use crate::model_client::*;
}

pub mod identity {
    pub use crate::identity::*;
}
