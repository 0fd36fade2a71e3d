//! Display sink: the consumer of resolved assets.

use tracing::info;

use crate::resolved::{Origin, ResolvedAsset};

/// Receives each successfully resolved asset exactly once.
///
/// Fire and forget: the pipeline ignores whatever the sink does with it.
/// Failed pipelines never reach the sink.
pub trait DisplaySink: Send + Sync {
    fn present(&self, asset: &ResolvedAsset);
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn present(&self, _asset: &ResolvedAsset) {}
}

/// Emits one `info!` event per asset.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl DisplaySink for LogSink {
    fn present(&self, asset: &ResolvedAsset) {
        let origin = match asset.origin {
            Origin::Store => "store",
            Origin::Network { persisted: true } => "network",
            Origin::Network { persisted: false } => "network (duplicate)",
        };
        for (tag, payload) in &asset.variants {
            info!(
                name = %asset.name,
                variant = %tag,
                media_type = tag.media_type(),
                bytes = payload.len(),
                origin,
                "asset ready"
            );
        }
    }
}
