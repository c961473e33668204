use serde::Serialize;

/// Spatial reference system of a layer, as stored by its source.
///
/// Coordinate transformation is not performed anywhere in this crate; the
/// definition is carried along and written out unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialRef {
    pub srs_id: i32,
    pub srs_name: String,
    pub organization: String,
    pub organization_coordsys_id: i32,
    /// Well-known text definition, `"undefined"` for the placeholder systems.
    pub wkt: String,
    /// PROJ string when the source stores one (PostGIS does, GeoPackage does not).
    pub proj4: Option<String>,
}

/// The projection summary shown to callers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Projection {
    pub proj4: String,
    #[serde(rename = "projcs")]
    pub projected_crs_name: Option<String>,
    #[serde(rename = "geocs")]
    pub geographic_crs_name: Option<String>,
}

impl SpatialRef {
    pub fn is_defined(&self) -> bool {
        let wkt = self.wkt.trim();
        !wkt.is_empty() && !wkt.eq_ignore_ascii_case("undefined")
    }

    pub fn projection(&self) -> Projection {
        Projection {
            proj4: self.proj4_string(),
            projected_crs_name: wkt_attr_value(&self.wkt, "PROJCS"),
            geographic_crs_name: wkt_attr_value(&self.wkt, "GEOGCS"),
        }
    }

    /// PROJ string for the system, or an empty string when none can be found.
    ///
    /// Tried in order: the stored value, a WKT `PROJ4` extension, the EPSG
    /// definition of the authority code (from the table or from the WKT
    /// `AUTHORITY` node), and a WGS 84 UTM zone named in `PROJCS`.
    pub fn proj4_string(&self) -> String {
        if let Some(proj4) = self.proj4.as_deref().filter(|p| !p.trim().is_empty()) {
            return proj4.trim().to_string();
        }
        if let Some(proj4) = wkt_proj4_extension(&self.wkt) {
            return proj4;
        }
        let code = if self.organization.eq_ignore_ascii_case("EPSG") {
            Some(self.organization_coordsys_id)
        } else {
            wkt_epsg_authority(&self.wkt)
        };
        if let Some(proj4) = code.and_then(epsg_proj4) {
            return proj4;
        }
        wkt_utm_proj4(&self.wkt).unwrap_or_default()
    }
}

fn epsg_proj4(code: i32) -> Option<String> {
    let code = u16::try_from(code).ok()?;
    crs_definitions::from_code(code).map(|def| def.proj4.trim().to_string())
}

/// Value of the first quoted argument of a WKT node, e.g. the name of
/// `PROJCS["WGS 84 / UTM zone 33N", ...]`.
pub(crate) fn wkt_attr_value(wkt: &str, node: &str) -> Option<String> {
    let upper = wkt.to_ascii_uppercase();
    let needle = format!("{}[", node.to_ascii_uppercase());
    let start = upper.find(&needle)? + needle.len();
    let rest = wkt[start..].trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

fn wkt_proj4_extension(wkt: &str) -> Option<String> {
    let upper = wkt.to_ascii_uppercase();
    let start = upper.find("EXTENSION[\"PROJ4\"")? + "EXTENSION[\"PROJ4\"".len();
    let rest = wkt[start..].trim_start().strip_prefix(',')?.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

// Code of the outermost `AUTHORITY["EPSG","<code>"]`, which WKT1 puts last.
fn wkt_epsg_authority(wkt: &str) -> Option<i32> {
    let upper = wkt.to_ascii_uppercase();
    let needle = "AUTHORITY[\"EPSG\"";
    let start = upper.rfind(needle)? + needle.len();
    let rest = wkt[start..].trim_start().strip_prefix(',')?.trim_start();
    let rest = rest.trim_start_matches('"');
    let end = rest.find(|c: char| !c.is_ascii_digit())?;
    rest[..end].parse().ok()
}

// "WGS 84 / UTM zone 33N" and friends.
fn wkt_utm_proj4(wkt: &str) -> Option<String> {
    let projcs = wkt_attr_value(wkt, "PROJCS")?;
    let upper = projcs.to_ascii_uppercase();
    if !upper.starts_with("WGS 84") && !upper.starts_with("WGS_1984") {
        return None;
    }
    let start = upper.find("UTM ZONE")? + "UTM ZONE".len();
    let zone_text = upper[start..].trim_start_matches([' ', '_']);
    let digits = zone_text.find(|c: char| !c.is_ascii_digit()).unwrap_or(zone_text.len());
    let zone: u8 = zone_text[..digits].parse().ok()?;
    if !(1..=60).contains(&zone) {
        return None;
    }
    let south = match zone_text[digits..].chars().next() {
        Some('N') => "",
        Some('S') => " +south",
        _ => return None,
    };
    Some(format!("+proj=utm +zone={zone}{south} +datum=WGS84 +units=m +no_defs"))
}
