//! Pre-scan of a transfer source.
//!
//! The whole source tree is listed before the first byte is written, which
//! gives progress reporting its totals and pairs every source item with its
//! exact destination.

use crate::progress::TransferTask;
use duopane_storage::error::Batch;
use duopane_storage::{Path, StatResult};
use futures::TryStreamExt;
use futures::future::{BoxFuture, FutureExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemKind {
    Directory,
    File { size: u64 },
    /// Re-created as a link at the destination.
    Link,
    /// A link to a directory on a destination without link support. Following
    /// it could loop, so it is left out.
    SkippedLink,
}

#[derive(Debug, Clone)]
pub(crate) struct Item {
    pub source: Path,
    pub dest: Path,
    pub kind: ItemKind,
}

#[derive(Debug, Default)]
pub(crate) struct Plan {
    /// Depth first; every directory precedes its contents.
    pub items: Vec<Item>,
    pub files_total: u64,
    pub bytes_total: u64,
}

impl Plan {
    /// Scan `source`, mapping it onto `dest` itself (not into it).
    ///
    /// A failure to describe the root is returned directly; listing failures
    /// further down are collected into `batch` and the rest of the tree is
    /// still planned. Stops early, with a partial plan, once cancelled.
    pub async fn scan(
        source: &Path,
        dest: &Path,
        batch: &mut Batch,
        task: &TransferTask<'_>,
    ) -> duopane_storage::Result<Plan> {
        let stat = source.stat().await?;
        let mut plan = Plan::default();
        let links = dest.supports_symlinks();
        if plan.push(source.clone(), dest.clone(), &stat, links) == ItemKind::Directory {
            plan.walk(source, dest, links, batch, task).await;
        }
        tracing::debug!(%source, files = plan.files_total, bytes = plan.bytes_total, "planned transfer");
        Ok(plan)
    }

    /// Whether the root is a single file or link.
    pub fn is_single_item(&self) -> bool {
        matches!(self.items.first(), Some(item) if item.kind != ItemKind::Directory)
    }

    fn push(&mut self, source: Path, dest: Path, stat: &StatResult, links: bool) -> ItemKind {
        let kind = match (stat.is_symlink, stat.is_directory) {
            (true, _) if links => ItemKind::Link,
            (true, true) => ItemKind::SkippedLink,
            (_, true) => ItemKind::Directory,
            (_, false) => ItemKind::File { size: stat.size },
        };
        match kind {
            ItemKind::File { size } => {
                self.files_total += 1;
                self.bytes_total += size;
            },
            ItemKind::Link => self.files_total += 1,
            ItemKind::Directory | ItemKind::SkippedLink => {},
        }
        self.items.push(Item { source, dest, kind });
        kind
    }

    fn walk<'a>(
        &'a mut self,
        source: &'a Path,
        dest: &'a Path,
        links: bool,
        batch: &'a mut Batch,
        task: &'a TransferTask<'_>,
    ) -> BoxFuture<'a, ()> {
        async move {
            if task.is_cancelled() {
                return;
            }
            let mut children: Vec<(Path, StatResult)> = match source.scandir().try_collect().await {
                Ok(children) => children,
                Err(err) => {
                    batch.failed(source, err);
                    return;
                },
            };
            children.sort_by(|(a, _), (b, _)| a.cmp(b));
            for (child, stat) in children {
                let target = dest.join(&child.name());
                if self.push(child.clone(), target.clone(), &stat, links) == ItemKind::Directory {
                    self.walk(&child, &target, links, batch, task).await;
                }
            }
        }
        .boxed()
    }
}
