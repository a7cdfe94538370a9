//! The URIs served by the app.

/// The root route which redirects to the accounts page.
pub const ROOT: &str = "/";
/// The page listing accounts with their balances and the monthly summary.
pub const ACCOUNTS_VIEW: &str = "/accounts";
/// The page to display when an internal server error occurs.
pub const INTERNAL_ERROR_VIEW: &str = "/error";
/// The route for static files.
pub const STATIC: &str = "/static";
