use crate::config::{parse_size, Config, SCHEMA_VERSION};
use crate::error::{AmemError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every failure
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_concepts(config, &mut errors);
        Self::validate_ranking(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AmemError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        let size = &config.storage.max_file_size;
        if parse_size(size).is_none() {
            errors.push(ValidationError::new(
                "storage.max_file_size",
                format!("Invalid size format: {}", size),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if config.embedding.namespace.trim().is_empty() {
            errors.push(ValidationError::new(
                "embedding.namespace",
                "Namespace cannot be empty",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        let chunking = &config.chunking;
        if chunking.window == 0 {
            errors.push(ValidationError::new(
                "chunking.window",
                "Window must be greater than 0",
            ));
        } else if chunking.overlap >= chunking.window {
            errors.push(ValidationError::new(
                "chunking.overlap",
                format!(
                    "Overlap ({}) must be smaller than the window ({})",
                    chunking.overlap, chunking.window
                ),
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.candidate_multiplier == 0 {
            errors.push(ValidationError::new(
                "index.candidate_multiplier",
                "Candidate multiplier must be greater than 0",
            ));
        }

        let lambda = config.index.mmr_lambda;
        if !(0.0..=1.0).contains(&lambda) {
            errors.push(ValidationError::new(
                "index.mmr_lambda",
                format!("MMR lambda must be between 0.0 and 1.0, got {}", lambda),
            ));
        }
    }

    fn validate_concepts(config: &Config, errors: &mut Vec<ValidationError>) {
        let concepts = &config.concepts;
        if concepts.max_label_len == 0 {
            errors.push(ValidationError::new(
                "concepts.max_label_len",
                "Maximum label length must be greater than 0",
            ));
        }

        if !(-1.0..=1.0).contains(&concepts.related_threshold) {
            errors.push(ValidationError::new(
                "concepts.related_threshold",
                format!(
                    "Threshold is a cosine and must be between -1.0 and 1.0, got {}",
                    concepts.related_threshold
                ),
            ));
        }

        if !concepts.related_margin.is_finite() || concepts.related_margin < 0.0 {
            errors.push(ValidationError::new(
                "concepts.related_margin",
                "Margin must be a non-negative number",
            ));
        }
    }

    fn validate_ranking(config: &Config, errors: &mut Vec<ValidationError>) {
        let r = &config.ranking;

        let weights = [
            ("alpha", r.alpha),
            ("beta", r.beta),
            ("gamma", r.gamma),
            ("delta", r.delta),
            ("a1", r.a1),
            ("a2", r.a2),
            ("a3", r.a3),
            ("a4", r.a4),
            ("a5", r.a5),
            ("concept_boost", r.concept_boost),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                errors.push(ValidationError::new(
                    format!("ranking.{}", name),
                    format!("Weight must be a non-negative number, got {}", value),
                ));
            }
        }

        for (name, days) in [
            ("half_life_days", r.half_life_days),
            ("recency_half_life_days", r.recency_half_life_days),
        ] {
            if !days.is_finite() || days <= 0.0 {
                errors.push(ValidationError::new(
                    format!("ranking.{}", name),
                    format!("Half-life must be greater than 0, got {}", days),
                ));
            }
        }

        if !(-1.0..=1.0).contains(&r.cluster_threshold) {
            errors.push(ValidationError::new(
                "ranking.cluster_threshold",
                format!(
                    "Threshold is a cosine and must be between -1.0 and 1.0, got {}",
                    r.cluster_threshold
                ),
            ));
        }

        if r.candidate_pool == 0 {
            errors.push(ValidationError::new(
                "ranking.candidate_pool",
                "Candidate pool must be greater than 0",
            ));
        }
    }
}
