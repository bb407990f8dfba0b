use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{LexembedError, Result, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_corpus(config, &mut errors);
        Self::validate_output(config, &mut errors);
        Self::validate_chunking(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_header(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LexembedError::ConfigValidation { errors })
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

    fn validate_corpus(config: &Config, errors: &mut Vec<ValidationError>) {
        // Existence is checked when the run starts; the path may be relative
        if config.corpus.path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "corpus.path",
                "Corpus path cannot be empty",
            ));
        }

        if config.corpus.id_field.is_empty() {
            errors.push(ValidationError::new(
                "corpus.id_field",
                "Identifier field name cannot be empty",
            ));
        }

        if config.corpus.text_field.is_empty() {
            errors.push(ValidationError::new(
                "corpus.text_field",
                "Text field name cannot be empty",
            ));
        }

        if !config.corpus.id_field.is_empty() && config.corpus.id_field == config.corpus.text_field
        {
            errors.push(ValidationError::new(
                "corpus.text_field",
                "Text field must differ from the identifier field",
            ));
        }
    }

    fn validate_output(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.output.dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "output.dir",
                "Output directory cannot be empty",
            ));
        }
    }

    fn validate_chunking(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.chunking.chunk_size == 0 {
            errors.push(ValidationError::new(
                "chunking.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }

        if config.chunking.batch_size == 0 {
            errors.push(ValidationError::new(
                "chunking.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if let Some(file) = &config.chunking.tokenizer_file {
            if file.as_os_str().is_empty() {
                errors.push(ValidationError::new(
                    "chunking.tokenizer_file",
                    "Tokenizer file path cannot be empty",
                ));
            }
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_header(config: &Config, errors: &mut Vec<ValidationError>) {
        if !config.header.enabled {
            return;
        }

        if config.header.template.trim().is_empty() {
            errors.push(ValidationError::new(
                "header.template",
                "Header template cannot be empty when the header is enabled",
            ));
        }

        for field in config.header.mappings.keys() {
            let placeholder = format!("{{{}}}", field);
            if !config.header.template.contains(&placeholder) {
                errors.push(ValidationError::new(
                    format!("header.mappings.{}", field),
                    format!("Mapping for '{}' has no placeholder in the template", field),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_zero_chunk_size() {
        let mut config = Config::default();
        config.chunking.chunk_size = 0;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.chunking.batch_size = 0;
        config.embedding.batch_size = 0;
        config.output.dir = PathBuf::new();

        match ConfigValidator::validate(&config) {
            Err(LexembedError::ConfigValidation { errors }) => {
                assert_eq!(errors.len(), 3);
                assert!(errors.iter().any(|e| e.path == "output.dir"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_same_id_and_text_field() {
        let mut config = Config::default();
        config.corpus.text_field = config.corpus.id_field.clone();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_orphan_header_mapping() {
        let mut config = Config::default();
        config.header.template = "Title: {citation}\n".to_string();
        assert!(ConfigValidator::validate(&config).is_err());

        config.header.enabled = false;
        assert!(ConfigValidator::validate(&config).is_ok());
    }
}
