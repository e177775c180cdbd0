//! Source resolution
//!
//! Picks a concrete URL from a single source or a quality-variant set.
//! This is coarse tier selection for progressive files only; bitrate
//! adaptation of manifest sources belongs to the adaptive-stream engine.
//!
//! Policy (downlink buckets):
//! - save-data, downlink below `low_threshold_mbps` or a small viewport:
//!   `low ?? mid ?? high`
//! - downlink below `mid_threshold_mbps`: `mid ?? low ?? high`
//! - otherwise: `high ?? mid ?? low`

use crate::{
    config::ResolverConfig,
    media::{NetworkSignals, SignalProvider},
    types::{MediaSource, QualityTier, QualityVariants},
};
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Manifest types handed to the adaptive-stream engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestType {
    Hls,
    Dash,
}

/// Detect a manifest URL from its path suffix, ignoring query and fragment
pub fn detect_manifest_type(url: &str) -> Option<ManifestType> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_lowercase(),
        // Relative URLs: strip query and fragment by hand
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_lowercase(),
    };

    if path.ends_with(".m3u8") || path.ends_with(".m3u") {
        Some(ManifestType::Hls)
    } else if path.ends_with(".mpd") {
        Some(ManifestType::Dash)
    } else {
        None
    }
}

/// Whether a URL must go through the adaptive-stream engine
pub fn is_manifest_url(url: &str) -> bool {
    detect_manifest_type(url).is_some()
}

/// Signals a resolution decision is based on
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResolveContext {
    pub network: NetworkSignals,
    pub viewport_width: Option<u32>,
}

impl ResolveContext {
    pub fn from_provider(provider: &dyn SignalProvider) -> Self {
        Self {
            network: provider.network(),
            viewport_width: provider.viewport_width(),
        }
    }

    /// Downlink estimate: measured downlink, else the connection class,
    /// else the configured conservative default
    pub fn downlink_mbps(&self, config: &ResolverConfig) -> f64 {
        self.network
            .downlink_mbps
            .filter(|d| d.is_finite() && *d > 0.0)
            .or_else(|| self.network.effective_type.map(|t| t.typical_downlink_mbps()))
            .unwrap_or(config.default_downlink_mbps)
    }

    pub fn is_small_viewport(&self, config: &ResolverConfig) -> bool {
        self.viewport_width
            .map(|w| w < config.small_viewport_px)
            .unwrap_or(false)
    }
}

/// Preferred tier for the given signals
pub fn preferred_tier(context: &ResolveContext, config: &ResolverConfig) -> QualityTier {
    let downlink = context.downlink_mbps(config);

    if context.network.save_data
        || downlink < config.low_threshold_mbps
        || context.is_small_viewport(config)
    {
        QualityTier::Low
    } else if downlink < config.mid_threshold_mbps {
        QualityTier::Mid
    } else {
        QualityTier::High
    }
}

/// Fallback order when the preferred tier is absent
fn fallback_order(preferred: QualityTier) -> [QualityTier; 3] {
    match preferred {
        QualityTier::Low => [QualityTier::Low, QualityTier::Mid, QualityTier::High],
        QualityTier::Mid => [QualityTier::Mid, QualityTier::Low, QualityTier::High],
        QualityTier::High => [QualityTier::High, QualityTier::Mid, QualityTier::Low],
    }
}

/// Select a variant. Returns the tier actually used and its URL.
pub fn select_variant<'a>(
    variants: &'a QualityVariants,
    context: &ResolveContext,
    config: &ResolverConfig,
) -> Option<(QualityTier, &'a str)> {
    fallback_order(preferred_tier(context, config))
        .into_iter()
        .find_map(|tier| variants.get(tier).map(|url| (tier, url)))
}

/// Resolve a source to a playable URL. Pure: same inputs, same output.
pub fn resolve(
    src: &MediaSource,
    context: &ResolveContext,
    config: &ResolverConfig,
) -> Option<String> {
    match src {
        MediaSource::Url(url) if url.is_empty() => None,
        MediaSource::Url(url) => Some(url.clone()),
        MediaSource::Variants(variants) => {
            select_variant(variants, context, config).map(|(_, url)| url.to_string())
        }
    }
}

/// Resolver bound to live signals
pub struct SourceResolver {
    config: ResolverConfig,
    signals: Arc<dyn SignalProvider>,
}

impl SourceResolver {
    pub fn new(config: ResolverConfig, signals: Arc<dyn SignalProvider>) -> Self {
        Self { config, signals }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Snapshot the current signals
    pub fn context(&self) -> ResolveContext {
        ResolveContext::from_provider(self.signals.as_ref())
    }

    #[instrument(skip(self))]
    pub fn resolve(&self, src: &MediaSource) -> Option<String> {
        let context = self.context();
        let resolved = resolve(src, &context, &self.config);

        debug!(
            downlink_mbps = context.downlink_mbps(&self.config),
            save_data = context.network.save_data,
            viewport = ?context.viewport_width,
            resolved = ?resolved,
            "Source resolved"
        );

        resolved
    }
}

impl std::fmt::Debug for SourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::EffectiveType;

    fn all_variants() -> QualityVariants {
        QualityVariants::new()
            .with_low("low.mp4")
            .with_mid("mid.mp4")
            .with_high("high.mp4")
    }

    fn context(downlink: Option<f64>, viewport: Option<u32>) -> ResolveContext {
        ResolveContext {
            network: NetworkSignals {
                downlink_mbps: downlink,
                ..Default::default()
            },
            viewport_width: viewport,
        }
    }

    #[test]
    fn test_single_url_passthrough() {
        let config = ResolverConfig::default();
        let src = MediaSource::from("https://cdn.example.com/master.m3u8");
        assert_eq!(
            resolve(&src, &context(None, None), &config).as_deref(),
            Some("https://cdn.example.com/master.m3u8")
        );
        assert_eq!(resolve(&MediaSource::from(""), &context(None, None), &config), None);
    }

    #[test]
    fn test_bandwidth_buckets() {
        let config = ResolverConfig::default();
        let src = MediaSource::Variants(all_variants());

        let pick = |d| resolve(&src, &context(Some(d), Some(1080)), &config);
        assert_eq!(pick(0.8).as_deref(), Some("low.mp4"));
        assert_eq!(pick(3.0).as_deref(), Some("mid.mp4"));
        assert_eq!(pick(20.0).as_deref(), Some("high.mp4"));
    }

    #[test]
    fn test_small_viewport_prefers_low() {
        let config = ResolverConfig::default();
        let src = MediaSource::Variants(all_variants());
        assert_eq!(
            resolve(&src, &context(Some(50.0), Some(360)), &config).as_deref(),
            Some("low.mp4")
        );
    }

    #[test]
    fn test_save_data_prefers_low() {
        let config = ResolverConfig::default();
        let ctx = ResolveContext {
            network: NetworkSignals {
                save_data: true,
                downlink_mbps: Some(50.0),
                effective_type: Some(EffectiveType::FourG),
            },
            viewport_width: Some(1440),
        };
        assert_eq!(preferred_tier(&ctx, &config), QualityTier::Low);
    }

    #[test]
    fn test_effective_type_used_without_downlink() {
        let config = ResolverConfig::default();
        let ctx = ResolveContext {
            network: NetworkSignals {
                effective_type: Some(EffectiveType::ThreeG),
                ..Default::default()
            },
            viewport_width: Some(1080),
        };
        assert_eq!(preferred_tier(&ctx, &config), QualityTier::Low);

        // No signal at all: conservative default sits exactly on the low threshold
        assert_eq!(preferred_tier(&context(None, Some(1080)), &config), QualityTier::Mid);
    }

    #[test]
    fn test_tier_fallbacks() {
        let config = ResolverConfig::default();
        let only_high = QualityVariants::new().with_high("high.mp4");
        let only_low = QualityVariants::new().with_low("low.mp4");
        let low_and_high = QualityVariants::new().with_low("low.mp4").with_high("high.mp4");

        let slow = context(Some(0.5), None);
        let medium = context(Some(3.0), None);
        let fast = context(Some(50.0), None);

        assert_eq!(select_variant(&only_high, &slow, &config), Some((QualityTier::High, "high.mp4")));
        assert_eq!(select_variant(&only_low, &fast, &config), Some((QualityTier::Low, "low.mp4")));
        assert_eq!(select_variant(&low_and_high, &medium, &config), Some((QualityTier::Low, "low.mp4")));
        assert_eq!(select_variant(&QualityVariants::new(), &fast, &config), None);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let config = ResolverConfig::default();
        let src = MediaSource::Variants(all_variants());
        let ctx = context(Some(3.0), Some(720));
        assert_eq!(resolve(&src, &ctx, &config), resolve(&src, &ctx, &config));
    }

    #[test]
    fn test_detect_manifest() {
        assert_eq!(
            detect_manifest_type("https://cdn.example.com/v/master.m3u8?token=abc"),
            Some(ManifestType::Hls)
        );
        assert_eq!(detect_manifest_type("/v/manifest.MPD#t=3"), Some(ManifestType::Dash));
        assert_eq!(detect_manifest_type("https://cdn.example.com/v/clip.mp4"), None);
        assert!(!is_manifest_url("clip.m3u8.mp4"));
    }
}
