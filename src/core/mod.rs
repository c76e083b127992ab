// Conversion pipeline modules and shared errors/models
pub mod similarity {
    pub use crate::similarity::*;
}

pub mod duplicates {
    pub use crate::duplicates::*;
}

pub mod decision {
    pub use crate::decision::*;
}

pub mod wizard {
    pub use crate::wizard::*;
}

pub mod conversion {
    pub use crate::conversion::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
