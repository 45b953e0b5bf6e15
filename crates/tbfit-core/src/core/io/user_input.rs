use super::xml::{DocumentError, XmlDocument};
use std::path::{Path, PathBuf};

pub const MATERIAL_FIELD: &str = "material";
pub const MATERIAL_DB_PATH_FIELD: &str = "material_db_path";

/// Values substituted into the solver input template for one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBindings {
    pub material: String,
    pub material_db_path: PathBuf,
}

/// The solver's `user_input.xml`, kept as a template.
///
/// Only the two binding fields directly below the root are rewritten; the rest of
/// the document is written back untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverInputTemplate {
    document: XmlDocument,
}

impl SolverInputTemplate {
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        Ok(Self {
            document: XmlDocument::load(path)?,
        })
    }

    pub fn parse(source: &str) -> Result<Self, DocumentError> {
        Ok(Self {
            document: XmlDocument::parse(source)?,
        })
    }

    /// Fails with `MissingField` when a binding field is absent.
    pub fn validate(&self) -> Result<(), DocumentError> {
        for field in [MATERIAL_FIELD, MATERIAL_DB_PATH_FIELD] {
            if self.document.root.child(field).is_none() {
                return Err(DocumentError::MissingField(field.to_string()));
            }
        }
        Ok(())
    }

    pub fn material(&self) -> Option<String> {
        self.document.root.child(MATERIAL_FIELD).map(|el| el.text())
    }

    pub fn material_db_path(&self) -> Option<PathBuf> {
        self.document
            .root
            .child(MATERIAL_DB_PATH_FIELD)
            .map(|el| PathBuf::from(el.text()))
    }

    pub fn render(&self, bindings: &InputBindings) -> Result<XmlDocument, DocumentError> {
        let mut document = self.document.clone();
        let root = &mut document.root;

        root.child_mut(MATERIAL_FIELD)
            .ok_or_else(|| DocumentError::MissingField(MATERIAL_FIELD.to_string()))?
            .set_text(bindings.material.as_str());
        root.child_mut(MATERIAL_DB_PATH_FIELD)
            .ok_or_else(|| DocumentError::MissingField(MATERIAL_DB_PATH_FIELD.to_string()))?
            .set_text(bindings.material_db_path.to_string_lossy().into_owned());

        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<input>
  <material>Germanium</material>
  <material_db_path>/opt/db/materials.xml</material_db_path>
  <numerics basis="sp3d5s*" spin_orbit="false">
    <k_points>64</k_points>
  </numerics>
</input>
"#;

    fn bindings() -> InputBindings {
        InputBindings {
            material: "Silicon".to_string(),
            material_db_path: PathBuf::from("/scratch/tbf_1/materials.xml"),
        }
    }

    #[test]
    fn render_substitutes_both_fields() {
        let template = SolverInputTemplate::parse(TEMPLATE).unwrap();
        template.validate().unwrap();
        assert_eq!(template.material().as_deref(), Some("Germanium"));
        assert_eq!(
            template.material_db_path(),
            Some(PathBuf::from("/opt/db/materials.xml"))
        );

        let rendered = template.render(&bindings()).unwrap();
        assert_eq!(rendered.root.child(MATERIAL_FIELD).unwrap().text(), "Silicon");
        assert_eq!(
            rendered.root.child(MATERIAL_DB_PATH_FIELD).unwrap().text(),
            "/scratch/tbf_1/materials.xml"
        );
    }

    #[test]
    fn render_keeps_unrelated_structure() {
        let template = SolverInputTemplate::parse(TEMPLATE).unwrap();
        let rendered = template.render(&bindings()).unwrap();
        let original = XmlDocument::parse(TEMPLATE).unwrap();

        assert_eq!(rendered.root.child("numerics"), original.root.child("numerics"));
        let numerics = rendered.root.child("numerics").unwrap();
        assert_eq!(numerics.attribute("basis"), Some("sp3d5s*"));
        assert_eq!(numerics.child("k_points").unwrap().text(), "64");
    }

    #[test]
    fn render_changes_nothing_but_the_bindings() {
        let template = SolverInputTemplate::parse(TEMPLATE).unwrap();
        let written = template.render(&bindings()).unwrap().to_xml_string().unwrap();
        let expected = TEMPLATE
            .replace("Germanium", "Silicon")
            .replace("/opt/db/materials.xml", "/scratch/tbf_1/materials.xml");
        assert_eq!(written, expected);
    }

    #[test]
    fn missing_field_is_reported() {
        let template =
            SolverInputTemplate::parse("<input><material>Si</material></input>").unwrap();
        assert!(matches!(
            template.validate(),
            Err(DocumentError::MissingField(field)) if field == MATERIAL_DB_PATH_FIELD
        ));
        assert!(matches!(
            template.render(&bindings()),
            Err(DocumentError::MissingField(field)) if field == MATERIAL_DB_PATH_FIELD
        ));
    }
}
