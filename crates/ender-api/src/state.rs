//! Shared application state for the HTTP surface

use std::sync::Arc;

use ender_manager::{BackupEngine, Hub, Scheduler, ServerManager};
use ender_store::{EventStore, TemplateStore, UserStore};

use crate::auth::AuthState;

/// Everything the handlers reach for. Cloned per request; all members are
/// cheap handles.
#[derive(Clone)]
pub struct AppState {
    pub manager: ServerManager,
    pub backups: BackupEngine,
    pub scheduler: Arc<Scheduler>,
    pub hub: Arc<Hub>,
    pub users: UserStore,
    pub templates: TemplateStore,
    pub events: EventStore,
    pub auth: AuthState,
    /// Mark the login cookie `Secure`
    pub secure_cookies: bool,
}
