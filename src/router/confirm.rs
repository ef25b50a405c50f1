//! Email confirmation link.

use axum::extract::{Path, State};
use axum::response::Redirect;

use crate::error::Result;
use crate::router::REGISTER_ROUTE;
use crate::user::{AccountService, Confirmation};

/// Handler consuming the code mailed at registration.
///
/// Unknown, already used and orphaned codes all end on the same redirect.
pub async fn handler(
    State(accounts): State<AccountService>,
    Path(code): Path<String>,
) -> Result<Redirect> {
    let status = match accounts.confirm_email(&code).await? {
        Confirmation::Confirmed { .. } => "confirmed",
        Confirmation::Unknown | Confirmation::Orphaned { .. } => "invalid",
    };

    Ok(Redirect::to(&format!("{REGISTER_ROUTE}?confirmation={status}")))
}
