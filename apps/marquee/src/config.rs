use marquee_core::ScreenDescriptor;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct Config {
    pub invenue_host: Option<String>,
    pub device_id_override: Option<String>,
    pub store_dir: PathBuf,
    /// Fixed delay before retrying the registration chain after a failure.
    pub retry_delay: Duration,
    pub default_poll_interval: Duration,
    /// Screen list supplied by the hosting environment, when enumeration
    /// is not otherwise available. Format: `1920x1080+0+0,1280x720+1920+0`.
    pub screens: Option<Vec<ScreenDescriptor>>,
    /// Geometry reported when topology detection is unsupported.
    pub fallback_screen: ScreenDescriptor,
}

impl Config {
    pub fn from_env() -> Self {
        let retry_delay = env::var("MARQUEE_RETRY_DELAY_SECONDS")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or(30);
        let default_poll_interval = env::var("MARQUEE_POLL_INTERVAL_MS")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or(30_000);
        let screens = env::var("MARQUEE_SCREENS")
            .ok()
            .and_then(|val| parse_screens(&val));
        let fallback_screen = env::var("MARQUEE_PRIMARY_SCREEN")
            .ok()
            .and_then(|val| parse_screen(&val))
            .unwrap_or(ScreenDescriptor::full_screen(1920, 1080));

        Self {
            invenue_host: env::var("MARQUEE_HOST").ok(),
            device_id_override: env::var("MARQUEE_DEVICE_ID").ok(),
            store_dir: env::var("MARQUEE_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("marquee-store")),
            retry_delay: Duration::from_secs(retry_delay),
            default_poll_interval: Duration::from_millis(default_poll_interval),
            screens,
            fallback_screen,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            invenue_host: None,
            device_id_override: None,
            store_dir: PathBuf::from("marquee-store"),
            retry_delay: Duration::from_secs(30),
            default_poll_interval: Duration::from_millis(30_000),
            screens: None,
            fallback_screen: ScreenDescriptor::full_screen(1920, 1080),
        }
    }
}

/// Parses `WxH+L+T` (left/top may be negative, e.g. `1920x1080+-1920+0`).
fn parse_screen(spec: &str) -> Option<ScreenDescriptor> {
    let (size, position) = match spec.split_once('+') {
        Some((size, rest)) => (size, Some(rest)),
        None => (spec, None),
    };
    let (width, height) = size.split_once('x')?;
    let (left, top) = match position {
        Some(rest) => {
            let (left, top) = rest.split_once('+')?;
            (left.parse().ok()?, top.parse().ok()?)
        }
        None => (0, 0),
    };
    Some(ScreenDescriptor {
        width: width.parse().ok()?,
        height: height.parse().ok()?,
        left,
        top,
    })
}

fn parse_screens(spec: &str) -> Option<Vec<ScreenDescriptor>> {
    let screens: Vec<ScreenDescriptor> = spec
        .split(',')
        .filter(|part| !part.is_empty())
        .filter_map(parse_screen)
        .collect();
    if screens.is_empty() {
        None
    } else {
        Some(screens)
    }
}
