// * Browser fingerprint pools for stealth configuration.
// * One profile is drawn per engine run from the seeded RNG so that a run
// * is reproducible under a fixed seed.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue};

// * Current desktop browser identities; keep versions plausible together
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0",
];

// * Common physical resolutions; anything exotic is itself a signal
const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1440, 900),
    (1366, 768),
    (1536, 864),
    (2560, 1440),
];

const LOCALES: &[&str] = &["en-US", "en-GB", "de-DE", "fr-FR"];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9,en-US;q=0.8",
    "de-DE,de;q=0.9,en;q=0.8",
    "fr-FR,fr;q=0.9,en;q=0.8",
];

// * A randomized-but-plausible browser identity for one run
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub user_agent: &'static str,
    pub viewport: (u32, u32),
    pub locale: &'static str,
    pub accept_language: &'static str,
}

impl Fingerprint {
    pub fn sample(rng: &mut StdRng) -> Self {
        Self {
            user_agent: USER_AGENTS
                .choose(rng)
                .copied()
                .unwrap_or(USER_AGENTS[0]),
            viewport: VIEWPORTS.choose(rng).copied().unwrap_or(VIEWPORTS[0]),
            locale: LOCALES.choose(rng).copied().unwrap_or(LOCALES[0]),
            accept_language: ACCEPT_LANGUAGES
                .choose(rng)
                .copied()
                .unwrap_or(ACCEPT_LANGUAGES[0]),
        }
    }

    // * Applies the identity to a HeaderMap for the static engine's client.
    pub fn apply_to_headers(&self, headers: &mut HeaderMap) {
        if let Ok(value) = HeaderValue::from_str(self.user_agent) {
            headers.insert("User-Agent", value);
        }
        if let Ok(value) = HeaderValue::from_str(self.accept_language) {
            headers.insert("Accept-Language", value);
        }
        headers.insert(
            "Accept",
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8",
            ),
        );
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("document"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("navigate"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("none"));
    }
}
