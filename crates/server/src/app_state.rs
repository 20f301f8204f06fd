use server_api::{auth::JwtKeys, ApiContext};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) jwt: JwtKeys,
}
