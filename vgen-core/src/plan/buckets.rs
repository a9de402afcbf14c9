use std::collections::BTreeMap;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::config::VgenConfig;

use super::models::{
    Constraints, ContentFormat, CostEstimate, LengthBucket, LengthVariantRequest, Plan,
    VariantSpec, VariantTarget,
};

/// Character limit for each bucket, in bucket order. Short and medium take
/// the ceiling of one and two thirds of the budget, computed without
/// multiplying the full budget so any `usize` is accepted.
pub fn bucket_limits(max_chars: usize) -> [(LengthBucket, usize); 3] {
    let third = |parts: usize| {
        let whole = max_chars / 3 * parts;
        (whole + (max_chars % 3 * parts).div_ceil(3)).max(1)
    };
    [
        (LengthBucket::Short, third(1)),
        (LengthBucket::Medium, third(2)),
        (LengthBucket::Long, max_chars.max(1)),
    ]
}

/// Splits `total` across the buckets proportionally to `weights`.
///
/// Each bucket first gets `floor(total * w / sum(w))`; the units lost to
/// flooring go one at a time to the first positively weighted buckets, so
/// the counts always sum to `total`.
pub fn split_total(total: usize, weights: [u32; 3]) -> [usize; 3] {
    let weight_sum: u128 = weights.iter().map(|w| *w as u128).sum();
    if weight_sum == 0 {
        return [total, 0, 0];
    }
    let mut counts = [0usize; 3];
    for (count, weight) in counts.iter_mut().zip(weights) {
        *count = (total as u128 * weight as u128 / weight_sum) as usize;
    }
    let mut remainder = total - counts.iter().sum::<usize>();
    for (count, weight) in counts.iter_mut().zip(weights) {
        if remainder == 0 {
            break;
        }
        if weight > 0 {
            *count += 1;
            remainder -= 1;
        }
    }
    counts
}

/// Plans variants by length bucket instead of by platform.
#[derive(Debug, Clone)]
pub struct LengthBucketPlanner {
    config: Arc<VgenConfig>,
}

impl LengthBucketPlanner {
    pub fn new(config: Arc<VgenConfig>) -> Self {
        Self { config }
    }

    pub fn plan(&self, request: &LengthVariantRequest) -> Plan {
        let seed = request.seed.unwrap_or(self.config.pipeline.default_seed);
        let max_chars = request
            .max_chars
            .unwrap_or(self.config.buckets.default_max_chars);
        let total = request
            .total_variants
            .unwrap_or(self.config.buckets.default_total);

        let counts = split_total(total, self.config.buckets.weights);
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut variants = Vec::with_capacity(total.min(4096));

        for ((bucket, limit), count) in bucket_limits(max_chars).into_iter().zip(counts) {
            for slot_index in 0..count {
                let variation_seed: u64 = rng.gen();
                let mut prompt_params = BTreeMap::new();
                prompt_params.insert("content".to_string(), request.content.clone());
                prompt_params.insert("bucket".to_string(), bucket.as_str().to_string());
                prompt_params.insert("variation_seed".to_string(), variation_seed.to_string());
                variants.push(VariantSpec {
                    target: VariantTarget::Bucket(bucket),
                    slot_index,
                    constraints: Constraints {
                        max_length: limit,
                        format: ContentFormat::Plain,
                    },
                    prompt_params,
                });
            }
        }

        let cost = CostEstimate::for_variants(&self.config.pipeline, variants.len());
        Plan::assemble(seed, self.config.pipeline.config_version.clone(), variants, cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> LengthBucketPlanner {
        LengthBucketPlanner::new(Arc::new(VgenConfig::default()))
    }

    #[test]
    fn default_twenty_splits_seven_seven_six() {
        assert_eq!(split_total(20, [1, 1, 1]), [7, 7, 6]);
    }

    #[test]
    fn split_always_preserves_total() {
        for total in 0..64 {
            for weights in [[1, 1, 1], [2, 1, 1], [5, 3, 1], [0, 1, 1], [1, 0, 0]] {
                let counts = split_total(total, weights);
                assert_eq!(counts.iter().sum::<usize>(), total, "{total} {weights:?}");
            }
        }
    }

    #[test]
    fn remainder_skips_zero_weight_buckets() {
        assert_eq!(split_total(5, [0, 1, 1]), [0, 3, 2]);
        assert_eq!(split_total(10, [2, 1, 1]), [6, 2, 2]);
    }

    #[test]
    fn limits_for_default_budget() {
        let limits = bucket_limits(150);
        assert_eq!(
            limits,
            [
                (LengthBucket::Short, 50),
                (LengthBucket::Medium, 100),
                (LengthBucket::Long, 150)
            ]
        );
        assert_eq!(bucket_limits(100)[0].1, 34);
        assert_eq!(bucket_limits(100)[1].1, 67);
        assert_eq!(
            bucket_limits(1),
            [
                (LengthBucket::Short, 1),
                (LengthBucket::Medium, 1),
                (LengthBucket::Long, 1)
            ]
        );
    }

    #[test]
    fn limits_stay_ordered_at_the_top_of_the_range() {
        let [(_, short), (_, medium), (_, long)] = bucket_limits(usize::MAX);
        assert_eq!(short, usize::MAX / 3);
        assert_eq!(medium, usize::MAX / 3 * 2);
        assert_eq!(long, usize::MAX);
        for max_chars in [2, 3, 4, 5, 7, 149, 151] {
            let limits = bucket_limits(max_chars);
            assert_eq!(limits[0].1, (max_chars + 2) / 3, "{max_chars}");
            assert_eq!(limits[1].1, (2 * max_chars + 2) / 3, "{max_chars}");
        }
    }

    #[test]
    fn plan_uses_defaults_and_groups_buckets_in_order() {
        let plan = planner().plan(&LengthVariantRequest {
            content: "Fresh roast every Monday".into(),
            ..LengthVariantRequest::default()
        });
        assert_eq!(plan.len(), 20);
        let shorts = plan
            .variants
            .iter()
            .take_while(|spec| spec.target == VariantTarget::Bucket(LengthBucket::Short))
            .count();
        assert_eq!(shorts, 7);
        assert_eq!(plan.variants[7].slot_index, 0);
        assert_eq!(plan.variants[19].target, VariantTarget::Bucket(LengthBucket::Long));
        assert_eq!(plan.variants[19].slot_index, 5);
        assert_eq!(plan.variants[19].constraints.max_length, 150);
    }

    #[test]
    fn split_is_seed_independent() {
        let base = LengthVariantRequest {
            content: "copy".into(),
            total_variants: Some(11),
            ..LengthVariantRequest::default()
        };
        let a = planner().plan(&LengthVariantRequest {
            seed: Some(1),
            ..base.clone()
        });
        let b = planner().plan(&LengthVariantRequest {
            seed: Some(99),
            ..base
        });
        let keys = |plan: &Plan| plan.variants.iter().map(VariantSpec::key).collect::<Vec<_>>();
        assert_eq!(keys(&a), keys(&b));
        assert_ne!(a.variants, b.variants);
    }
}
