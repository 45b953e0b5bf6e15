use super::xml::{DocumentError, XmlDocument, XmlElement};
use crate::core::params::ParameterMap;
use std::path::Path;

const MATERIAL_TAG: &str = "material";
const NAME_ATTR: &str = "name";
const VALUE_ATTR: &str = "val";

/// Values are stored with a fixed six-decimal precision.
pub const VALUE_DECIMALS: usize = 6;

pub fn format_value(value: f64) -> String {
    format!("{value:.prec$}", prec = VALUE_DECIMALS)
}

/// The tight-binding parameter database read by the solver.
///
/// ```xml
/// <materials>
///   <material name="Silicon">
///     <E_s_a val="-2.150000"/>
///   </material>
/// </materials>
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDatabase {
    document: XmlDocument,
}

impl MaterialDatabase {
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

    pub fn list_materials(&self) -> Vec<String> {
        self.document
            .root
            .elements()
            .filter(|el| el.name == MATERIAL_TAG)
            .filter_map(|el| el.attribute(NAME_ATTR))
            .map(str::to_string)
            .collect()
    }

    pub fn has_material(&self, material: &str) -> bool {
        self.material(material).is_ok()
    }

    fn material(&self, material: &str) -> Result<&XmlElement, DocumentError> {
        self.document
            .root
            .elements()
            .find(|el| el.name == MATERIAL_TAG && el.attribute(NAME_ATTR) == Some(material))
            .ok_or_else(|| DocumentError::MaterialNotFound(material.to_string()))
    }

    fn material_mut(&mut self, material: &str) -> Result<&mut XmlElement, DocumentError> {
        self.document
            .root
            .elements_mut()
            .find(|el| el.name == MATERIAL_TAG && el.attribute(NAME_ATTR) == Some(material))
            .ok_or_else(|| DocumentError::MaterialNotFound(material.to_string()))
    }

    /// All `val`-carrying entries of a material, in document order.
    pub fn parameters(&self, material: &str) -> Result<Vec<(String, f64)>, DocumentError> {
        self.material(material)?
            .elements()
            .filter_map(|el| el.attribute(VALUE_ATTR).map(|raw| (el, raw)))
            .map(|(el, raw)| parse_value(el, raw).map(|value| (el.name.clone(), value)))
            .collect()
    }

    pub fn parameter(&self, material: &str, name: &str) -> Result<Option<f64>, DocumentError> {
        let material = self.material(material)?;
        match material.child(name).and_then(|el| el.attribute(VALUE_ATTR).map(|v| (el, v))) {
            Some((el, raw)) => parse_value(el, raw).map(Some),
            None => Ok(None),
        }
    }

    /// Writes a parameter map into one material.
    ///
    /// Explicit entries update or create their element. Mirrored twin entries only
    /// update an element the material already has.
    pub fn apply(
        &mut self,
        material: &str,
        parameters: &ParameterMap,
    ) -> Result<(), DocumentError> {
        let node = self.material_mut(material)?;
        for (name, entry) in parameters.iter() {
            let formatted = format_value(entry.value);
            match node.child_mut(name) {
                Some(existing) => existing.set_attribute(VALUE_ATTR, formatted),
                None if entry.is_explicit() => {
                    let mut element = XmlElement::new(name);
                    element.set_attribute(VALUE_ATTR, formatted);
                    node.push_element(element);
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Removes every material not named in `keep`.
    pub fn retain_materials<S: AsRef<str>>(&mut self, keep: &[S]) {
        self.document.root.retain_elements(|el| {
            el.name != MATERIAL_TAG
                || el
                    .attribute(NAME_ATTR)
                    .is_some_and(|name| keep.iter().any(|k| k.as_ref() == name))
        });
    }

    pub fn to_xml_string(&self) -> Result<String, DocumentError> {
        self.document.to_xml_string()
    }

    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        self.document.save(path)
    }
}

fn parse_value(element: &XmlElement, raw: &str) -> Result<f64, DocumentError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| DocumentError::InvalidValue {
            element: element.name.clone(),
            attribute: VALUE_ATTR.to_string(),
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::ParameterCodec;

    const DATABASE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<materials>
  <material name="Silicon">
    <E_s_a val="-2.15168"/>
    <E_s_c val="-2.15168"/>
    <pp_sigma val="4.10833"/>
    <lattice_constant val="5.431" unit="A"/>
  </material>
  <material name="Germanium">
    <E_s_a val="-1.95617"/>
  </material>
</materials>
"#;

    #[test]
    fn lists_materials_and_reads_parameters() {
        let db = MaterialDatabase::parse(DATABASE).unwrap();
        assert_eq!(db.list_materials(), vec!["Silicon", "Germanium"]);

        let params = db.parameters("Silicon").unwrap();
        assert_eq!(params.len(), 4);
        assert_eq!(params[0], ("E_s_a".to_string(), -2.15168));
        assert_eq!(db.parameter("Germanium", "E_s_a").unwrap(), Some(-1.95617));
        assert_eq!(db.parameter("Germanium", "pp_pi").unwrap(), None);
    }

    #[test]
    fn unknown_material_is_reported() {
        let db = MaterialDatabase::parse(DATABASE).unwrap();
        assert!(matches!(
            db.parameters("Carbon"),
            Err(DocumentError::MaterialNotFound(name)) if name == "Carbon"
        ));
    }

    #[test]
    fn apply_updates_twins_and_creates_missing_explicit_entries() {
        let mut db = MaterialDatabase::parse(DATABASE).unwrap();
        let map: ParameterMap = [("E_s_a", -3.0), ("pp_pi", -1.5)].into_iter().collect();
        db.apply("Silicon", &map).unwrap();

        assert_eq!(db.parameter("Silicon", "E_s_a").unwrap(), Some(-3.0));
        assert_eq!(db.parameter("Silicon", "E_s_c").unwrap(), Some(-3.0));
        assert_eq!(db.parameter("Silicon", "pp_pi").unwrap(), Some(-1.5));
        assert_eq!(db.parameter("Silicon", "pp_sigma").unwrap(), Some(4.10833));
    }

    #[test]
    fn apply_does_not_create_mirrored_twins() {
        let mut db = MaterialDatabase::parse(DATABASE).unwrap();
        let map: ParameterMap = [("E_s_a", -1.0)].into_iter().collect();
        db.apply("Germanium", &map).unwrap();

        assert_eq!(db.parameter("Germanium", "E_s_a").unwrap(), Some(-1.0));
        assert_eq!(db.parameter("Germanium", "E_s_c").unwrap(), None);
    }

    #[test]
    fn written_values_use_six_decimals_and_keep_other_attributes() {
        let mut db = MaterialDatabase::parse(DATABASE).unwrap();
        let map: ParameterMap = [("pp_sigma", 1.0 / 3.0)].into_iter().collect();
        db.apply("Silicon", &map).unwrap();

        let xml = db.to_xml_string().unwrap();
        assert!(xml.contains(r#"<pp_sigma val="0.333333"/>"#));
        assert!(xml.contains(r#"unit="A""#));
    }

    #[test]
    fn created_entries_are_laid_out_like_their_siblings() {
        let mut db = MaterialDatabase::parse(DATABASE).unwrap();
        let map: ParameterMap = [("pp_pi", -1.5)].into_iter().collect();
        db.apply("Silicon", &map).unwrap();

        let xml = db.to_xml_string().unwrap();
        assert!(xml.contains(
            "<lattice_constant val=\"5.431\" unit=\"A\"/>\n    <pp_pi val=\"-1.500000\"/>\n  </material>"
        ));
    }

    #[test]
    fn retain_materials_prunes_everything_else() {
        let mut db = MaterialDatabase::parse(DATABASE).unwrap();
        db.retain_materials(&["Silicon"]);
        assert_eq!(db.list_materials(), vec!["Silicon"]);
    }

    #[test]
    fn vector_round_trip_through_saved_document_holds_to_six_decimals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("materials.xml");
        let codec = ParameterCodec::new(["E_s_a", "pp_sigma", "pp_pi"]).unwrap();
        let vector = [-2.123456789, 4.000000449, -0.5];

        let mut db = MaterialDatabase::parse(DATABASE).unwrap();
        db.apply("Silicon", &codec.encode(&vector).unwrap()).unwrap();
        db.save(&path).unwrap();

        let reloaded = MaterialDatabase::load(&path).unwrap();
        let map: ParameterMap = reloaded
            .parameters("Silicon")
            .unwrap()
            .into_iter()
            .filter(|(name, _)| codec.names().contains(name))
            .collect();
        let decoded = codec.decode(&map).unwrap();
        for (a, b) in decoded.iter().zip(vector.iter()) {
            assert!((a - b).abs() <= 5e-7, "{a} vs {b}");
        }
    }
}
