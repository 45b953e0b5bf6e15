use super::map::ParameterMap;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    #[error("Parameter vector has {actual} entries but {expected} parameter names are configured")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Parameter '{0}' is missing from the parameter map")]
    MissingParameter(String),

    #[error("Invalid parameter name list: {0}")]
    InvalidNames(String),
}

/// Bidirectional mapping between a flat parameter vector and named parameters.
///
/// Position `i` of every vector is bound to `names()[i]` for the lifetime of the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterCodec {
    names: Vec<String>,
}

impl ParameterCodec {
    pub fn new<I, S>(names: I) -> Result<Self, CodecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(CodecError::InvalidNames(
                "at least one parameter name is required".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if name.trim().is_empty() {
                return Err(CodecError::InvalidNames(
                    "parameter names cannot be empty".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(CodecError::InvalidNames(format!(
                    "parameter '{name}' is listed more than once"
                )));
            }
        }

        Ok(Self { names })
    }

    pub fn dim(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn check_dimension(&self, vector: &[f64]) -> Result<(), CodecError> {
        if vector.len() != self.names.len() {
            return Err(CodecError::DimensionMismatch {
                expected: self.names.len(),
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Assigns each vector entry to its name, in vector order.
    ///
    /// Because values are applied in order, a twin listed later in the vector
    /// overrides (and is mirrored onto) a twin listed earlier.
    pub fn encode(&self, vector: &[f64]) -> Result<ParameterMap, CodecError> {
        self.check_dimension(vector)?;

        let mut map = ParameterMap::new();
        for (name, &value) in self.names.iter().zip(vector) {
            map.set(name, value);
        }
        Ok(map)
    }

    pub fn decode(&self, map: &ParameterMap) -> Result<Vec<f64>, CodecError> {
        self.names
            .iter()
            .map(|name| {
                map.get(name)
                    .ok_or_else(|| CodecError::MissingParameter(name.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::names::default_parameter_names;

    fn small_codec() -> ParameterCodec {
        ParameterCodec::new(["E_s_a", "E_p_a", "pp_sigma", "pp_pi"]).unwrap()
    }

    #[test]
    fn new_rejects_empty_and_duplicate_names() {
        assert!(matches!(
            ParameterCodec::new(Vec::<String>::new()),
            Err(CodecError::InvalidNames(_))
        ));
        assert!(matches!(
            ParameterCodec::new(["pp_pi", "pp_pi"]),
            Err(CodecError::InvalidNames(_))
        ));
    }

    #[test]
    fn encode_rejects_wrong_length() {
        let codec = small_codec();
        let result = codec.encode(&[1.0, 2.0]);
        assert_eq!(
            result,
            Err(CodecError::DimensionMismatch {
                expected: 4,
                actual: 2
            })
        );
    }

    #[test]
    fn decode_of_encode_is_identity_for_unpaired_and_single_twin_vectors() {
        let codec = small_codec();
        let vectors = [
            vec![-2.15, 4.23, 3.21, -1.05],
            vec![0.0, 0.0, 0.0, 0.0],
            vec![1e-7, -1e7, 123.456789, f64::MIN_POSITIVE],
        ];
        for v in vectors {
            let map = codec.encode(&v).unwrap();
            assert_eq!(codec.decode(&map).unwrap(), v);
        }
    }

    #[test]
    fn encode_mirrors_anion_value_onto_cation_twin() {
        let codec = small_codec();
        let map = codec.encode(&[-2.15, 4.23, 3.21, -1.05]).unwrap();
        assert_eq!(map.get("E_s_c"), Some(-2.15));
        assert_eq!(map.get("E_p_c"), Some(4.23));
    }

    #[test]
    fn twin_listed_later_in_the_vector_wins() {
        let codec = ParameterCodec::new(default_parameter_names()).unwrap();
        let mut v = vec![0.0; codec.dim()];
        v[0] = -2.0; // E_s_a
        v[1] = -3.0; // E_s_c, set later in the same batch

        let map = codec.encode(&v).unwrap();
        assert_eq!(map.get("E_s_a"), Some(-3.0));
        assert_eq!(map.get("E_s_c"), Some(-3.0));
    }

    #[test]
    fn decode_reports_missing_names() {
        let codec = small_codec();
        let map: ParameterMap = [("E_s_a", 1.0)].into_iter().collect();
        assert_eq!(
            codec.decode(&map),
            Err(CodecError::MissingParameter("E_p_a".to_string()))
        );
    }
}
