use std::sync::{Arc, atomic::AtomicBool};

use clap::Parser;
use kube::api::PatchParams;

use crate::{args::AnnogateArgs, consts};

/// Shared runtime state for the controller and the lease renewer.
#[derive(Clone)]
pub struct Context {
    pub args: AnnogateArgs,
    pub client: kube::Client,
    pub is_leader: Arc<AtomicBool>,
    pub hostname: String,
}

impl Context {
    pub async fn new() -> anyhow::Result<Self> {
        let args = AnnogateArgs::parse();
        let client = kube::Client::try_default().await?;
        let is_leader = Arc::new(AtomicBool::new(false));
        let hostname = std::env::var("HOSTNAME").or_else(|_| std::env::var("HOST"))?;
        Ok(Context {
            args,
            client,
            is_leader,
            hostname,
        })
    }

    /// Patch params for server-side apply of generated resources.
    pub fn patch_params(&self) -> PatchParams {
        PatchParams::apply(consts::FIELD_MANAGER)
    }
}
