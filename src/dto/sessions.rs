use serde::Deserialize;
use utoipa::IntoParams;
use validator::Validate;

use crate::session::validate_session_code;

#[derive(Debug, Deserialize, Validate, IntoParams)]
/// Path parameters of the `/sessions/{id}` routes.
#[into_params(parameter_in = Path)]
pub struct SessionPath {
    /// Session code (normally six digits).
    #[validate(custom(function = "validate_session_code"))]
    pub id: String,
}
