use std::result;

use crate::error::RouteError;

pub type Result<T> = result::Result<T, RouteError>;
