use crate::cli::{ParamsArgs, ParamsCommands};
use crate::config;
use crate::error::{CliError, Result};
use std::path::Path;
use tbfit::core::io::materials::{MaterialDatabase, format_value};
use tracing::info;

pub async fn run(args: ParamsArgs) -> Result<()> {
    match args.command {
        ParamsCommands::List { materials } => {
            let path = config::materials_path(materials.as_deref());
            for name in handle_list(&path)? {
                println!("{}", name);
            }
        }
        ParamsCommands::Show {
            material,
            materials,
            params,
        } => {
            let path = config::materials_path(materials.as_deref());
            for line in handle_show(&path, &material, params.as_deref())? {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

fn handle_list(path: &Path) -> Result<Vec<String>> {
    info!("Listing materials in {:?}", path);
    let database = MaterialDatabase::load(path)?;
    Ok(database.list_materials())
}

fn handle_show(path: &Path, material: &str, only: Option<&[String]>) -> Result<Vec<String>> {
    info!("Reading parameters of '{}' from {:?}", material, path);
    let database = MaterialDatabase::load(path)?;
    let parameters = database.parameters(material)?;

    let selected: Vec<(String, f64)> = match only {
        None => parameters,
        Some(names) => names
            .iter()
            .map(|name| {
                parameters
                    .iter()
                    .find(|(candidate, _)| candidate == name)
                    .cloned()
                    .ok_or_else(|| {
                        CliError::Argument(format!(
                            "Material '{}' has no parameter '{}'",
                            material, name
                        ))
                    })
            })
            .collect::<Result<_>>()?,
    };

    let width = selected
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0);
    Ok(selected
        .iter()
        .map(|(name, value)| format!("{:<width$}  {:>12}", name, format_value(*value)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const DATABASE: &str = r#"<materials>
  <material name="Silicon">
    <E_s_a val="-2.15"/>
    <E_p_a val="4.22"/>
    <description>diamond</description>
  </material>
  <material name="Germanium">
    <E_s_a val="-1.95"/>
  </material>
</materials>"#;

    fn database_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("materials.xml");
        fs::write(&path, DATABASE).unwrap();
        path
    }

    #[test]
    fn lists_materials_in_document_order() {
        let dir = tempdir().unwrap();
        let path = database_file(dir.path());
        assert_eq!(handle_list(&path).unwrap(), vec!["Silicon", "Germanium"]);
    }

    #[test]
    fn shows_all_parameters_with_six_decimals() {
        let dir = tempdir().unwrap();
        let path = database_file(dir.path());

        let lines = handle_show(&path, "Silicon", None).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("E_s_a"));
        assert!(lines[0].ends_with("-2.150000"));
        assert!(lines[1].ends_with("4.220000"));
    }

    #[test]
    fn shows_selected_parameters_in_requested_order() {
        let dir = tempdir().unwrap();
        let path = database_file(dir.path());

        let only = vec!["E_p_a".to_string(), "E_s_a".to_string()];
        let lines = handle_show(&path, "Silicon", Some(&only)).unwrap();
        assert!(lines[0].starts_with("E_p_a"));
        assert!(lines[1].starts_with("E_s_a"));

        let missing = vec!["pp_pi".to_string()];
        assert!(matches!(
            handle_show(&path, "Silicon", Some(&missing)),
            Err(CliError::Argument(_))
        ));
    }

    #[test]
    fn unknown_material_is_reported() {
        let dir = tempdir().unwrap();
        let path = database_file(dir.path());
        assert!(matches!(
            handle_show(&path, "Tin", None),
            Err(CliError::Document(_))
        ));
    }
}
