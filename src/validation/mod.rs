pub mod engine;
pub mod types;

pub use engine::{SCREENSHOT_DELTA_THRESHOLD, ValidationEngine, ValidationScope};
pub use types::{
    ActualResult, AuthActual, ButtonActual, ButtonProbe, CrudActual, DataLoadingActual, FormActual,
    NavigationActual, ValidationRecord, ValidationType, compare_subset,
};
