// Domain-layer modules: the pipeline and everything it computes or checks
pub mod pipeline {
    pub use crate::pipeline::*;
}

pub mod finance {
    pub use crate::finance::*;
}

pub mod schema {
    pub use crate::schema::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
