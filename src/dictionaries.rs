//! Static alias dictionaries for southern yellow pine mills and customers.
//!
//! These are loaded once into [`Dictionaries`] and handed explicitly to the
//! normalizer, scorer and backfill. A config file can replace any table.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Corporate and industry words that carry no identity.
const NOISE_TOKENS: &[&str] = &[
    "inc", "llc", "co", "corp", "ltd", "company", "corporation", "enterprises", "limited",
    "group", "holdings", "lumber", "timber", "forest", "products", "building", "supply",
    "distribution", "manufacturing", "mfg", "industries",
];

/// Single-word abbreviations expanded before scoring.
const COMPANY_EXPANSIONS: &[(&str, &str)] = &[
    ("gp", "georgia pacific"),
    ("wf", "west fraser"),
    ("pld", "potlatchdeltic"),
    ("pd", "potlatchdeltic"),
    ("ifg", "idaho forest group"),
    ("csp", "canfor"),
    ("wey", "weyerhaeuser"),
    ("fp", "forest products"),
];

/// Variant spelling -> canonical company name (no location).
const MILL_COMPANY_ALIASES: &[(&str, &str)] = &[
    ("canfor", "Canfor"),
    ("canfor southern pine", "Canfor"),
    ("csp", "Canfor"),
    ("west fraser", "West Fraser"),
    ("wf", "West Fraser"),
    ("georgia-pacific", "GP"),
    ("georgia pacific", "GP"),
    ("gp", "GP"),
    ("weyerhaeuser", "Weyerhaeuser"),
    ("weyerhaeuser company", "Weyerhaeuser"),
    ("wey", "Weyerhaeuser"),
    ("weyer", "Weyerhaeuser"),
    ("interfor", "Interfor"),
    ("potlatchdeltic", "PotlatchDeltic"),
    ("potlatch", "PotlatchDeltic"),
    ("potlatch deltic", "PotlatchDeltic"),
    ("pld", "PotlatchDeltic"),
    ("pd", "PotlatchDeltic"),
    ("rex", "Rex Lumber"),
    ("rex lumber", "Rex Lumber"),
    ("tolko", "Tolko"),
    ("idaho forest group", "Idaho Forest Group"),
    ("ifg", "Idaho Forest Group"),
    ("idaho forest", "Idaho Forest Group"),
    ("lumberton", "Idaho Forest Group"),
    ("lumberton lumber", "Idaho Forest Group"),
    ("hunt", "Hunt Forest Products"),
    ("hunt forest", "Hunt Forest Products"),
    ("hunt forest products", "Hunt Forest Products"),
    ("biewer", "Biewer"),
    ("biewer lumber", "Biewer"),
    ("anthony", "Anthony Timberlands"),
    ("anthony timberlands", "Anthony Timberlands"),
    ("tr miller", "T.R. Miller"),
    ("t r miller", "T.R. Miller"),
    ("lincoln", "Lincoln Lumber"),
    ("lincoln lumber", "Lincoln Lumber"),
    ("barge", "Barge Forest Products"),
    ("barge forest", "Barge Forest Products"),
    ("scotch", "Scotch Lumber"),
    ("scotch lumber", "Scotch Lumber"),
    ("klausner", "Binderholz"),
    ("klausner lumber", "Binderholz"),
    ("binderholz", "Binderholz"),
    ("hood", "Hood Industries"),
    ("hood industries", "Hood Industries"),
    ("mid south", "Mid-South Lumber"),
    ("mid south lumber", "Mid-South Lumber"),
    ("mid south lumber company", "Mid-South Lumber"),
    ("midsouth", "Mid-South Lumber"),
    ("midsouth lumber", "Mid-South Lumber"),
    ("murray", "Murray Lumber"),
    ("murray lumber", "Murray Lumber"),
    ("langdale", "Langdale Forest Products"),
    ("langdale forest", "Langdale Forest Products"),
    ("lasalle", "LaSalle Lumber"),
    ("lasalle lumber", "LaSalle Lumber"),
    ("big river", "Big River Forest Products"),
    ("big river forest", "Big River Forest Products"),
    ("hankins", "Hankins Lumber"),
    ("hankins lumber", "Hankins Lumber"),
    ("westervelt", "Westervelt Lumber"),
    ("westervelt lumber", "Westervelt Lumber"),
];

/// Customer spelling -> canonical customer name.
const CUSTOMER_ALIASES: &[(&str, &str)] = &[
    ("power truss", "Power Truss and Lumber"),
    ("power truss and lumber", "Power Truss and Lumber"),
    ("power truss inc", "Power Truss and Lumber"),
    ("protec panel and truss", "ProTec Panel and Truss"),
    ("protec", "ProTec Panel and Truss"),
    ("rehkemper and sons", "Rehkemper & Sons"),
    ("rehkemper and son", "Rehkemper & Sons"),
    ("rehkemper and son inc", "Rehkemper & Sons"),
    ("craters and freighters", "Craters & Freighters"),
];

/// Known mill locations: "Company - City" -> (city, state).
const MILL_DIRECTORY: &[(&str, &str, &str)] = &[
    ("Canfor - DeQuincy", "DeQuincy", "LA"),
    ("Canfor - Urbana", "Urbana", "AR"),
    ("Canfor - Fulton", "Fulton", "AL"),
    ("Canfor - Axis", "Axis", "AL"),
    ("Canfor - El Dorado", "El Dorado", "AR"),
    ("Canfor - Thomasville", "Thomasville", "GA"),
    ("Canfor - Moultrie", "Moultrie", "GA"),
    ("Canfor - DeRidder", "Deridder", "LA"),
    ("Canfor - Camden SC", "Camden", "SC"),
    ("Canfor - Conway", "Conway", "SC"),
    ("Canfor - Marion", "Marion", "SC"),
    ("Canfor - Graham", "Graham", "NC"),
    ("West Fraser - Huttig", "Huttig", "AR"),
    ("West Fraser - Leola", "Leola", "AR"),
    ("West Fraser - Opelika", "Opelika", "AL"),
    ("West Fraser - Russellville", "Russellville", "AR"),
    ("West Fraser - Blackshear", "Blackshear", "GA"),
    ("West Fraser - Dudley", "Dudley", "GA"),
    ("West Fraser - Fitzgerald", "Fitzgerald", "GA"),
    ("West Fraser - New Boston", "New Boston", "TX"),
    ("West Fraser - Henderson", "Henderson", "TX"),
    ("West Fraser - Lufkin", "Lufkin", "TX"),
    ("West Fraser - Joyce", "Joyce", "LA"),
    ("GP - Clarendon", "Clarendon", "NC"),
    ("GP - Camden", "Camden", "TX"),
    ("GP - Talladega", "Talladega", "AL"),
    ("GP - Frisco City", "Frisco City", "AL"),
    ("GP - Gurdon", "Gurdon", "AR"),
    ("GP - Albany", "Albany", "GA"),
    ("GP - Warrenton", "Warrenton", "GA"),
    ("GP - Taylorsville", "Taylorsville", "MS"),
    ("GP - Dudley NC", "Dudley", "NC"),
    ("GP - Diboll", "Diboll", "TX"),
    ("GP - Pineland", "Pineland", "TX"),
    ("GP - Prosperity", "Prosperity", "SC"),
    ("GP - Rome", "Rome", "GA"),
    ("Weyerhaeuser - Dierks", "Dierks", "AR"),
    ("Weyerhaeuser - Millport", "Millport", "AL"),
    ("Weyerhaeuser - Dodson", "Dodson", "LA"),
    ("Weyerhaeuser - Holden", "Holden", "LA"),
    ("Weyerhaeuser - Philadelphia", "Philadelphia", "MS"),
    ("Weyerhaeuser - Bruce", "Bruce", "MS"),
    ("Weyerhaeuser - Magnolia", "Magnolia", "MS"),
    ("Weyerhaeuser - Grifton", "Grifton", "NC"),
    ("Weyerhaeuser - Plymouth", "Plymouth", "NC"),
    ("Weyerhaeuser - Idabel", "Idabel", "OK"),
    ("Interfor - Monticello", "Monticello", "AR"),
    ("Interfor - Georgetown", "Georgetown", "SC"),
    ("Interfor - Fayette", "Fayette", "AL"),
    ("Interfor - DeQuincy", "DeQuincy", "LA"),
    ("Interfor - Preston", "Preston", "GA"),
    ("Interfor - Perry", "Perry", "GA"),
    ("Interfor - Baxley", "Baxley", "GA"),
    ("Interfor - Swainsboro", "Swainsboro", "GA"),
    ("Interfor - Thomaston", "Thomaston", "GA"),
    ("Interfor - Eatonton", "Eatonton", "GA"),
    ("PotlatchDeltic - Warren", "Warren", "AR"),
    ("PotlatchDeltic - Ola", "Ola", "AR"),
    ("PotlatchDeltic - Waldo", "Waldo", "AR"),
    ("Rex Lumber - Bristol", "Bristol", "FL"),
    ("Rex Lumber - Graceville", "Graceville", "FL"),
    ("Rex Lumber - Troy", "Troy", "AL"),
    ("Rex Lumber - Brookhaven", "Brookhaven", "MS"),
    ("Tolko - Leland", "Leland", "MS"),
    ("Idaho Forest Group - Lumberton", "Lumberton", "MS"),
    ("Hunt Forest Products - Winnfield", "Winnfield", "LA"),
    ("Biewer - Newton", "Newton", "MS"),
    ("Biewer - Winona", "Winona", "MS"),
    ("Anthony Timberlands - Bearden", "Bearden", "AR"),
    ("Anthony Timberlands - Malvern", "Malvern", "AR"),
    ("T.R. Miller - Brewton", "Brewton", "AL"),
    ("Lincoln Lumber - Jasper", "Jasper", "TX"),
    ("Lincoln Lumber - Conroe", "Conroe", "TX"),
    ("Barge Forest Products - Macon", "Macon", "MS"),
    ("Scotch Lumber - Fulton", "Fulton", "AL"),
    ("Klausner Lumber - Live Oak", "Live Oak", "FL"),
    ("Hood Industries - Beaumont", "Beaumont", "MS"),
    ("Hood Industries - Waynesboro", "Waynesboro", "MS"),
    ("Mid-South Lumber - Booneville", "Booneville", "MS"),
    ("Murray Lumber - Murray", "Murray", "KY"),
    ("Langdale Forest Products - Valdosta", "Valdosta", "GA"),
    ("LaSalle Lumber - Urania", "Urania", "LA"),
    ("Big River Forest Products - Gloster", "Gloster", "MS"),
    ("Hankins Lumber - Grenada", "Grenada", "MS"),
    ("Westervelt Lumber - Moundville", "Moundville", "AL"),
    ("Westervelt Lumber - Tuscaloosa", "Tuscaloosa", "AL"),
];

/// State code -> market region.
const STATE_REGIONS: &[(&str, &str)] = &[
    ("TX", "west"), ("LA", "west"), ("AR", "west"), ("OK", "west"), ("NM", "west"),
    ("MS", "central"), ("AL", "central"), ("TN", "central"), ("KY", "central"),
    ("MO", "central"), ("IL", "central"), ("WI", "central"), ("MN", "central"),
    ("IA", "central"),
    ("GA", "east"), ("FL", "east"), ("SC", "east"), ("NC", "east"), ("VA", "east"),
    ("WV", "east"), ("OH", "east"), ("IN", "east"), ("MI", "east"), ("PA", "east"),
    ("NY", "east"), ("NJ", "east"), ("MD", "east"), ("DE", "east"), ("CT", "east"),
    ("MA", "east"), ("ME", "east"), ("NH", "east"), ("VT", "east"), ("RI", "east"),
];

/// Region used when a state is unknown.
pub const DEFAULT_REGION: &str = "central";

/// City and state for one directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MillLocation {
    pub city: String,
    pub state: String,
}

/// Every table the normalizer, scorer and backfill consult.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dictionaries {
    pub noise_tokens: BTreeSet<String>,
    pub state_codes: BTreeSet<String>,
    pub state_regions: BTreeMap<String, String>,
    pub company_expansions: BTreeMap<String, String>,
    pub mill_company_aliases: BTreeMap<String, String>,
    pub customer_aliases: BTreeMap<String, String>,
    pub mill_directory: BTreeMap<String, MillLocation>,
}

impl Default for Dictionaries {
    fn default() -> Self {
        let pairs = |table: &[(&str, &str)]| -> BTreeMap<String, String> {
            table
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };

        Self {
            noise_tokens: NOISE_TOKENS.iter().map(|t| t.to_string()).collect(),
            state_codes: STATE_REGIONS.iter().map(|(s, _)| s.to_string()).collect(),
            state_regions: pairs(STATE_REGIONS),
            company_expansions: pairs(COMPANY_EXPANSIONS),
            mill_company_aliases: pairs(MILL_COMPANY_ALIASES),
            customer_aliases: pairs(CUSTOMER_ALIASES),
            mill_directory: MILL_DIRECTORY
                .iter()
                .map(|(name, city, state)| {
                    (
                        name.to_string(),
                        MillLocation {
                            city: city.to_string(),
                            state: state.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl Dictionaries {
    /// Tables with no entries at all. Useful when a test wants full control.
    pub fn empty() -> Self {
        Self {
            noise_tokens: BTreeSet::new(),
            state_codes: BTreeSet::new(),
            state_regions: BTreeMap::new(),
            company_expansions: BTreeMap::new(),
            mill_company_aliases: BTreeMap::new(),
            customer_aliases: BTreeMap::new(),
            mill_directory: BTreeMap::new(),
        }
    }

    /// Market region for a state code, falling back to [`DEFAULT_REGION`].
    pub fn region_for_state(&self, state: &str) -> &str {
        self.state_regions
            .get(&state.trim().to_ascii_uppercase())
            .map(String::as_str)
            .unwrap_or(DEFAULT_REGION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tables_are_populated() {
        let d = Dictionaries::default();
        assert!(d.noise_tokens.contains("llc"));
        assert_eq!(d.company_expansions.get("gp").map(String::as_str), Some("georgia pacific"));
        assert_eq!(d.mill_company_aliases.get("canfor southern pine").map(String::as_str), Some("Canfor"));
        assert_eq!(d.mill_directory["GP - Gurdon"].state, "AR");
        assert!(d.state_codes.contains("LA"));
    }

    #[test]
    fn test_region_for_state() {
        let d = Dictionaries::default();
        assert_eq!(d.region_for_state("tx"), "west");
        assert_eq!(d.region_for_state("GA"), "east");
        assert_eq!(d.region_for_state("ZZ"), DEFAULT_REGION);
    }

    #[test]
    fn test_partial_json_keeps_defaults_for_missing_tables() {
        let d: Dictionaries =
            serde_json::from_str(r#"{"customerAliases": {"acme": "Acme Builders Co"}}"#).unwrap();
        assert_eq!(d.customer_aliases.len(), 1);
        assert!(d.mill_company_aliases.contains_key("gp"));
    }
}
