use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use spatial_kernel::{BatchContext, CommandState, Node, NodeCommandProcessor, NodeCommandState};

use crate::NodeArchive;

/// Restores archived payloads into nodes as they load.
///
/// A record replaces the factory-built payload only when its version is at
/// least the node's; the node then adopts the stored version.
#[derive(Debug, Clone)]
pub struct ArchiveLoadProcessor {
    archive: Arc<NodeArchive>,
}

impl ArchiveLoadProcessor {
    pub fn new(archive: Arc<NodeArchive>) -> Self {
        Self { archive }
    }
}

struct LoadState<'a> {
    archive: &'a NodeArchive,
    restored: usize,
    failed: usize,
}

impl CommandState for LoadState<'_> {
    fn destroy(self: Box<Self>) {
        if self.restored > 0 || self.failed > 0 {
            tracing::debug!(restored = self.restored, failed = self.failed, "archive load batch");
        }
    }
}

impl<N: DeserializeOwned, L> NodeCommandState<N, L> for LoadState<'_> {
    fn process(&mut self, _ctx: &BatchContext, _level: &mut L, node: &mut Node<N>) {
        match self.archive.restore::<N>(node.coord(), node.network_version()) {
            Ok(Some((version, data))) => {
                node.data = data;
                node.raise_version(version);
                self.restored += 1;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(coord = %node.coord(), error = %e, "archive restore failed");
                self.failed += 1;
            }
        }
    }
}

impl<N, L> NodeCommandProcessor<N, L> for ArchiveLoadProcessor
where
    N: DeserializeOwned,
{
    fn name(&self) -> &str {
        "archive-load"
    }

    fn initialize<'a>(&'a self, _ctx: &BatchContext) -> Box<dyn NodeCommandState<N, L> + 'a> {
        Box::new(LoadState {
            archive: &self.archive,
            restored: 0,
            failed: 0,
        })
    }
}

/// Archives node payloads as they unload.
#[derive(Debug, Clone)]
pub struct ArchiveUnloadProcessor {
    archive: Arc<NodeArchive>,
}

impl ArchiveUnloadProcessor {
    pub fn new(archive: Arc<NodeArchive>) -> Self {
        Self { archive }
    }
}

struct UnloadState<'a> {
    archive: &'a NodeArchive,
    stored: usize,
}

impl CommandState for UnloadState<'_> {
    fn destroy(self: Box<Self>) {
        if self.stored > 0 {
            tracing::debug!(stored = self.stored, "archive unload batch");
        }
    }
}

impl<N: Serialize, L> NodeCommandState<N, L> for UnloadState<'_> {
    fn process(&mut self, ctx: &BatchContext, _level: &mut L, node: &mut Node<N>) {
        match self
            .archive
            .store(node.coord(), node.network_version(), ctx.now, &node.data)
        {
            Ok(true) => self.stored += 1,
            Ok(false) => {}
            Err(e) => tracing::warn!(coord = %node.coord(), error = %e, "archive store failed"),
        }
    }
}

impl<N, L> NodeCommandProcessor<N, L> for ArchiveUnloadProcessor
where
    N: Serialize,
{
    fn name(&self) -> &str {
        "archive-unload"
    }

    fn initialize<'a>(&'a self, _ctx: &BatchContext) -> Box<dyn NodeCommandState<N, L> + 'a> {
        Box::new(UnloadState {
            archive: &self.archive,
            stored: 0,
        })
    }
}
