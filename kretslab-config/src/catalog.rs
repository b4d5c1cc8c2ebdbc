use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

/// Where device templates come from. The built-in catalog is used when no
/// path is set.
#[derive(Default, Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct CatalogConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = validation::validate_catalog_path))]
    pub path: Option<String>,
}
