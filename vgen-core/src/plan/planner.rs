use std::collections::BTreeMap;
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::debug;

use crate::config::{PlatformProfile, VgenConfig};

use super::models::{
    Constraints, ContentFormat, CostEstimate, Plan, PlanRequest, VariantSpec, VariantTarget,
    LONG_FORM_FLAG,
};

/// Platform planner: `(request, seed) -> Plan`, no I/O.
#[derive(Debug, Clone)]
pub struct Planner {
    config: Arc<VgenConfig>,
}

impl Planner {
    pub fn new(config: Arc<VgenConfig>) -> Self {
        Self { config }
    }

    pub fn resolve_seed(&self, request: &PlanRequest) -> u64 {
        request.seed.unwrap_or(self.config.pipeline.default_seed)
    }

    pub fn resolve_platforms(&self, request: &PlanRequest) -> Vec<String> {
        request
            .platforms
            .clone()
            .unwrap_or_else(|| self.config.pipeline.default_platforms.clone())
    }

    pub fn plan(&self, request: &PlanRequest) -> Plan {
        self.plan_with_seed(request, self.resolve_seed(request))
    }

    pub fn plan_with_seed(&self, request: &PlanRequest, seed: u64) -> Plan {
        let platforms = self.resolve_platforms(request);
        let per_platform = request
            .variants_per_platform
            .unwrap_or(self.config.pipeline.default_variants_per_platform);
        let long_form = request.has_flag(LONG_FORM_FLAG);

        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut variants = Vec::with_capacity(platforms.len().saturating_mul(per_platform).min(4096));

        for platform in &platforms {
            let constraints = self.constraints_for(self.config.platform(platform), long_form);
            let angles = self.shuffled_angles(&mut rng);
            for slot_index in 0..per_platform {
                let variation_seed: u64 = rng.gen();
                let angle = &angles[slot_index % angles.len()];
                variants.push(VariantSpec {
                    target: VariantTarget::Platform(platform.clone()),
                    slot_index,
                    constraints,
                    prompt_params: prompt_params(request, platform, angle, variation_seed),
                });
            }
        }

        let cost = CostEstimate::for_variants(&self.config.pipeline, variants.len());
        debug!(
            target: "planner",
            seed,
            platforms = platforms.len(),
            variants = variants.len(),
            "plan assembled"
        );
        Plan::assemble(seed, self.config.pipeline.config_version.clone(), variants, cost)
    }

    fn constraints_for(&self, profile: Option<&PlatformProfile>, long_form: bool) -> Constraints {
        match profile {
            Some(profile) => {
                let max_length = if long_form {
                    profile.long_form_max_length.unwrap_or(profile.max_length)
                } else {
                    profile.max_length
                };
                Constraints {
                    max_length,
                    format: profile.format,
                }
            }
            None => Constraints {
                max_length: self.config.pipeline.fallback_max_length,
                format: ContentFormat::Plain,
            },
        }
    }

    fn shuffled_angles(&self, rng: &mut ChaCha20Rng) -> Vec<String> {
        let mut angles = self.config.pipeline.angles.clone();
        if angles.is_empty() {
            angles.push("general".to_string());
        }
        angles.shuffle(rng);
        angles
    }
}

fn prompt_params(
    request: &PlanRequest,
    platform: &str,
    angle: &str,
    variation_seed: u64,
) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    params.insert("brand".to_string(), request.brand.name.clone());
    params.insert("asset".to_string(), request.source_asset.reference.clone());
    params.insert("platform".to_string(), platform.to_string());
    params.insert("angle".to_string(), angle.to_string());
    params.insert("variation_seed".to_string(), variation_seed.to_string());
    let optional = [
        ("asset_description", &request.source_asset.description),
        ("voice", &request.brand.voice),
        ("audience", &request.brand.audience),
        ("call_to_action", &request.brand.call_to_action),
    ];
    for (key, value) in optional {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            params.insert(key.to_string(), value.to_string());
        }
    }
    params
}
