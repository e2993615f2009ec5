//! Composition root: pages, event feeds and the HTTP router.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use iot_client::contracts::ContractSet;
use iot_client::pages::{AdminPage, DataPage, DevicesPage, PageContext, RewardsPage};
use iot_client::reconcile::spawn_reconciler;
use iot_client::storage::ContentStore;
use iot_client::subscriber::EventSubscriber;
use iot_client::{ChainReader, NotificationLog, Notifier, WalletContext};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;

pub struct AppState {
    pub wallet: WalletContext,
    pub notifications: Arc<NotificationLog>,
    pub admin: AdminPage,
    pub devices: DevicesPage,
    pub rewards: RewardsPage,
    pub data: DataPage,
}

impl AppState {
    pub fn new(
        ctx: PageContext,
        contracts: ContractSet,
        store: Arc<dyn ContentStore>,
        notifications: Arc<NotificationLog>,
    ) -> Self {
        Self {
            wallet: ctx.wallet_context(),
            admin: AdminPage::new(
                ctx.clone(),
                contracts.access_manager,
                contracts.oracle_integration.clone(),
            ),
            devices: DevicesPage::new(ctx.clone(), contracts.device_registry, store),
            rewards: RewardsPage::new(ctx.clone(), contracts.token_rewards),
            data: DataPage::new(ctx, contracts.oracle_integration),
            notifications,
        }
    }

    /// Subscribe the admin and rewards feeds and start their fold loops.
    pub async fn spawn_event_feeds(
        &self,
        chain: Arc<dyn ChainReader>,
        poll_interval: Duration,
    ) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let subscriber = EventSubscriber::new(chain, poll_interval);
        let notifier: Arc<dyn Notifier> = self.notifications.clone();

        let admin = subscriber.subscribe(self.admin.event_specs()?).await?;
        let mut handles = vec![spawn_reconciler(admin, self.admin.feed(), notifier.clone())];

        if self.wallet.is_connected() {
            let rewards = subscriber.subscribe(self.rewards.event_specs()?).await?;
            handles.push(spawn_reconciler(rewards, self.rewards.ledger(), notifier));
        }

        info!("Started {} event feed(s)", handles.len());
        Ok(handles)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/notifications", get(api::notifications))
        .route("/admin", get(api::get_admin))
        .route("/admin/admins", post(api::add_admin))
        .route("/admin/admins/remove", post(api::remove_admin))
        .route("/admin/oracle", post(api::set_oracle_address))
        .route("/admin/oracle/reset", post(api::reset_oracle_config))
        .route("/admin/data-feed", post(api::set_data_feed_id))
        .route("/admin/disputes/resolve", post(api::resolve_dispute))
        .route("/devices", get(api::get_devices).post(api::register_device))
        .route("/rewards", get(api::get_rewards))
        .route("/rewards/claim", post(api::claim_rewards))
        .route("/data", get(api::get_data).post(api::submit_data))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
