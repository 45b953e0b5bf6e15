use std::path::PathBuf;

pub struct DefaultsConfig {
    pub material: String,
    pub materials: PathBuf,
    pub user_input: PathBuf,
    pub solver: PathBuf,
    pub out_dir: PathBuf,
    pub popsize: usize,
    pub max_generations: usize,
    pub seed: u64,
    pub tol_x: f64,
    pub tol_fun: f64,
    pub capture_output: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            material: "Silicon".to_string(),
            materials: PathBuf::from("simulator/Jancu_Materials.xml"),
            user_input: PathBuf::from("simulator/user_input_tight_binding.xml"),
            solver: PathBuf::from("simulator/sdt"),
            out_dir: PathBuf::from("results"),
            popsize: 32,
            max_generations: 200,
            seed: 0,
            tol_x: 1e-11,
            tol_fun: 1e-11,
            capture_output: true,
        }
    }
}
