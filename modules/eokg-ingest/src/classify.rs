//! Applied research area classification for publication abstracts.

use std::sync::LazyLock;

use regex::Regex;

/// Assigns a publication to one applied research area, by label.
pub trait ResearchAreaClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Option<String>;
}

/// Applied research areas and the cue words that indicate each.
const AREAS: [(&str, &str); 21] = [
    ("Agriculture", r"agricultur\w*|crops?|cropland|farm\w*|irrigat\w*|harvest\w*"),
    ("Air Quality", r"air quality|air pollut\w*|particulate matter|pm2\.5|ozone pollution|aerosol pollution"),
    ("Atmospheric/Ocean Indicators", r"sea surface temperature|ocean circulation|el ni[nñ]o|enso|atmospheric circulation|sea level"),
    ("Cryospheric Indicators", r"sea ice|glacier\w*|ice sheet\w*|snow cover|permafrost|cryospher\w*"),
    ("Droughts", r"drought\w*|soil moisture deficit|water scarcity"),
    ("Earthquakes", r"earthquake\w*|seismic\w*|fault slip|tectonic deformation"),
    ("Ecosystems", r"ecosystem\w*|biodiversity|vegetation dynamics|phenology|habitat\w*"),
    ("Energy Production/Use", r"solar energy|wind energy|renewable energy|energy production|energy use|power plant\w*"),
    ("Environmental Impacts", r"environmental impact\w*|land degradation|pollution impact\w*|anthropogenic impact\w*"),
    ("Floods", r"flood\w*|inundation|river discharge"),
    ("Greenhouse Gases", r"greenhouse gas\w*|carbon dioxide|co2|methane|ch4|carbon flux\w*"),
    ("Habitat Conversion/Fragmentation", r"deforestation|habitat loss|fragmentation|land cover change|land conversion"),
    ("Heat", r"heat ?waves?|extreme heat|urban heat island|heat stress"),
    ("Land Surface/Agriculture Indicators", r"land surface temperature|ndvi|evapotranspiration|leaf area index|land surface"),
    ("Public Health", r"public health|disease\w*|mortality|malaria|epidemi\w*|health outcome\w*"),
    ("Severe Storms", r"hurricane\w*|tropical cyclone\w*|typhoon\w*|tornado\w*|severe storm\w*|convective storm\w*"),
    ("Sun-Earth Interactions", r"solar wind|geomagnetic|ionospher\w*|magnetospher\w*|solar irradiance|space weather"),
    ("Validation", r"validat\w*|calibrat\w*|ground truth|intercomparison"),
    ("Volcanic Eruptions", r"volcan\w*|eruption\w*|ash plume\w*|so2 emission\w*"),
    ("Water Quality", r"water quality|turbidity|algal bloom\w*|chlorophyll|sediment load"),
    ("Wildfires", r"wildfire\w*|forest fire\w*|burn(?:ed)? area|fire emission\w*|biomass burning"),
];

static LEXICON: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    AREAS
        .iter()
        .map(|(label, cues)| (*label, Regex::new(&format!(r"(?i)\b(?:{cues})\b")).unwrap()))
        .collect()
});

/// Picks the area whose cue words occur most often. Ties go to the area listed first.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexiconClassifier;

impl LexiconClassifier {
    pub fn labels() -> impl Iterator<Item = &'static str> {
        AREAS.iter().map(|(label, _)| *label)
    }
}

impl ResearchAreaClassifier for LexiconClassifier {
    fn classify(&self, text: &str) -> Option<String> {
        let mut best: Option<(&str, usize)> = None;
        for (label, cues) in LEXICON.iter() {
            let hits = cues.find_iter(text).count();
            if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
                best = Some((*label, hits));
            }
        }
        best.map(|(label, _)| label.to_string())
    }
}
