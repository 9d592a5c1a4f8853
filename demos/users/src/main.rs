//! Users demo binary
//!
//! Binds both features to one lifecycle, loads the user list, deletes a user
//! and prints the Prometheus metrics collected along the way.

use flowstore_runtime::metrics::install_prometheus;
use flowstore_runtime::{FeatureBinding, Lifecycle, StoreProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use users::{DeleteUserFeature, DeleteUserUseCase, GetUsersFeature, GetUsersUseCase, UsersEvent, UsersState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "users=info,flowstore_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let exporter = install_prometheus()?;
    let provider = StoreProvider::global();
    let lifecycle = Arc::new(Lifecycle::new());

    let get_users = Arc::new(GetUsersFeature::new(
        provider,
        GetUsersUseCase::new(Duration::from_millis(200)),
        tokio::runtime::Handle::current(),
    )?);
    let delete_user = DeleteUserFeature::new(provider, DeleteUserUseCase)?;

    let printer = get_users.store().observe(
        flowstore_runtime::SubscriptionKind::State,
        |state: &Arc<UsersState>, event: &Arc<UsersEvent>| {
            println!("{event:?} -> loading={} users={:?}", state.loading, state.users);
        },
    );
    printer.bind(&lifecycle);
    let _binding = FeatureBinding::bind(Arc::clone(&get_users), &lifecycle);

    println!("=== Users Demo ===\n");
    let mut states = get_users.store().subscribe_state();
    lifecycle.start();

    while let Some(state) = states.recv().await {
        if !state.users.is_empty() {
            break;
        }
    }

    delete_user.delete(2)?.wait().await?;
    let deleted = delete_user.store().state();
    println!(
        "\nDeleted user {} (done: {}, pending: {})",
        deleted.deleted_user, deleted.user_deleted, deleted.loading
    );

    lifecycle.destroy();
    println!("\nRegistered stores: {:?}", provider.keys());
    println!("Health: {}", provider.health().status);

    if let Some(text) = exporter.render() {
        println!("\n=== Metrics ===\n{text}");
    }
    Ok(())
}
