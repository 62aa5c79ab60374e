pub mod auth;
pub mod clients;
pub mod paiements;
pub mod passages;
pub mod prestations;
pub mod sync;
pub mod users;

use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(auth::routes())
        .merge(clients::routes())
        .merge(prestations::routes())
        .merge(passages::routes())
        .merge(paiements::routes())
        .merge(users::routes())
        .merge(sync::routes())
}
