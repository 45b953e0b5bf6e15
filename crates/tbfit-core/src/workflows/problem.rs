use crate::core::io::bandstructure::BandStructure;
use crate::core::io::materials::MaterialDatabase;
use crate::core::io::npy;
use crate::core::io::user_input::SolverInputTemplate;
use crate::core::loss::{LossEvaluator, LossWeights};
use crate::core::params::{CodecError, ParameterCodec};
use crate::engine::config::{InitialGuess, ProblemConfig};
use crate::engine::error::EngineError;
use crate::engine::optimizer::standard_normal_vector;
use tracing::{debug, info};

/// Inputs shared by every evaluation of one fitting problem, loaded and validated.
pub(crate) struct Problem {
    pub codec: ParameterCodec,
    pub database: MaterialDatabase,
    pub template: SolverInputTemplate,
    pub loss: LossEvaluator,
}

impl Problem {
    pub fn load(config: &ProblemConfig) -> Result<Self, EngineError> {
        let reference = BandStructure::load_reference(&config.reference_path)?;
        info!(
            k_points = reference.n_kpoints(),
            bands = reference.n_bands(),
            "Loaded reference band structure."
        );

        let database = MaterialDatabase::load(&config.materials_path)?;
        // Fails early with MaterialNotFound.
        let current = database.parameters(&config.material)?;
        debug!(
            material = %config.material,
            parameters = current.len(),
            "Loaded parameter database."
        );

        let template = SolverInputTemplate::load(&config.template_path)?;
        template.validate()?;

        let codec = ParameterCodec::new(config.parameter_names.iter().cloned())?;

        let loss = match &config.loss_weights_path {
            Some(path) => LossEvaluator::with_weights(reference, LossWeights::load(path)?)?,
            None => LossEvaluator::new(reference),
        };

        Ok(Self {
            codec,
            database,
            template,
            loss,
        })
    }

    /// Resolves a parameter vector and checks its dimension against the codec.
    pub fn resolve_vector(
        &self,
        guess: &InitialGuess,
        material: &str,
        seed: u64,
    ) -> Result<Vec<f64>, EngineError> {
        let vector = match guess {
            InitialGuess::Vector(v) => v.clone(),
            InitialGuess::NpyFile(path) => npy::read_vector(path)?,
            InitialGuess::Database => self
                .codec
                .names()
                .iter()
                .map(|name| -> Result<f64, EngineError> {
                    self.database
                        .parameter(material, name)?
                        .ok_or_else(|| CodecError::MissingParameter(name.clone()).into())
                })
                .collect::<Result<Vec<f64>, EngineError>>()?,
            InitialGuess::Random => standard_normal_vector(self.codec.dim(), seed),
        };
        self.codec.check_dimension(&vector)?;
        Ok(vector)
    }
}
