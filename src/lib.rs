#![deny(dead_code)]
#![deny(unused_imports)]

pub mod layout;
pub mod linalg;
pub mod model;
pub mod transform;
pub mod types;
pub mod verify;

pub use layout::{Binding, LayoutBuilder, LayoutError, ParamLayout};
pub use linalg::{CovCholesky, LinalgError, is_positive_definite, min_eigenvalue};
pub use model::{ConstrainedModel, ParameterizedModel, RawObjective};
pub use transform::Transform;
pub use types::{CheckOptions, FreeParams, RawParams};
pub use verify::{CheckError, GradientEntry, GradientReport, check_gradient, check_gradient_with};
