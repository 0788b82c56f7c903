//! Binary entrypoint: loads the server config, plan, and masks from disk,
//! wires up the engine, and serves the `TestCoordinator` gRPC service.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use coord_core::action::{NoopOperatorControlPlane, OperatorControlPlane};
use coord_core::cache::ObjectStateCache;
use coord_core::context::ActionContext;
use coord_core::plan::{self, MaskResolver};
use coord_core::state_machine::{spawn_timeout_triggers, StateMachine};
use coord_server::config::{load_plan, load_server_config, MaskTable};
use coord_server::operator::KubeOperatorControlPlane;
use coord_server::rpc::{proto::test_coordinator_server::TestCoordinatorServer, CoordinatorService};
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser)]
#[command(about = "Deterministic fault-injection test coordinator")]
struct Opts {
    /// Path to the server config (namespace, API server identities, bind address).
    #[arg(long, env = "COORD_CONFIG", default_value = "server.yaml")]
    config: PathBuf,

    /// Path to the test plan.
    #[arg(long, env = "COORD_PLAN", default_value = "plan.yaml")]
    plan: PathBuf,

    /// Path to the learned field mask.
    #[arg(long, env = "COORD_LEARNED_MASK", default_value = "learned-mask.json")]
    learned_mask: PathBuf,

    /// Path to the configured field mask.
    #[arg(long, env = "COORD_CONFIGURED_MASK", default_value = "configured-mask.json")]
    configured_mask: PathBuf,

    /// Run without a real Kubernetes cluster: restart/reconnect actions
    /// become no-ops. Useful for plans with no such actions.
    #[arg(long, env = "COORD_DRY_RUN")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let opts = Opts::parse();
    let server_config = load_server_config(&opts.config)?;
    let raw_plan = load_plan(&opts.plan)?;
    let masks = MaskTable::load(&opts.learned_mask, &opts.configured_mask)?;

    let slots = plan::compile(raw_plan, &masks as &dyn MaskResolver)?;
    info!(actions = slots.len(), "compiled test plan");

    let control_plane: Arc<dyn OperatorControlPlane> = if opts.dry_run {
        Arc::new(NoopOperatorControlPlane)
    } else {
        let client = kube::Client::try_default().await?;
        Arc::new(KubeOperatorControlPlane::new(client))
    };

    let (async_done_tx, async_done_rx) = mpsc::channel(32);
    let ctx = Arc::new(ActionContext::new(
        server_config.namespace.clone(),
        server_config.leading_api_server.clone(),
        server_config.following_api_server.clone(),
        async_done_tx.clone(),
    ));

    let (state_tx, state_rx) = mpsc::channel(256);
    spawn_timeout_triggers(&slots, state_tx.clone());

    let state_machine = StateMachine::new(slots, ctx.clone(), control_plane, async_done_tx);
    tokio::spawn(state_machine.run(state_rx, async_done_rx));

    let cache = Arc::new(ObjectStateCache::new());
    let service = CoordinatorService::new(cache, state_tx, ctx, Arc::new(masks));

    let addr = server_config.bind_addr.parse()?;
    info!(%addr, "serving TestCoordinator");
    tonic::transport::Server::builder()
        .add_service(TestCoordinatorServer::new(service))
        .serve(addr)
        .await?;

    Ok(())
}
