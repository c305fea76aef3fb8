// =============================================================================
// Neural signal source — per-asset level files under the neural directory
// =============================================================================
//
// Files per asset:
//   long_dca_signal.txt   — integer 0..7; entry permission at >= 3, DCA
//                           assist levels 4..7 map to DCA stages 0..3
//   short_dca_signal.txt  — integer 0..7; any value > 0 vetoes new entries
//   low_bound_prices.html — whitespace/comma/pipe separated floats,
//                           de-duplicated and sorted descending so index 0
//                           is N1 (highest line) and index 6 is N7 (lowest)
//
// Folder rule: BTC reads from the neural directory itself; every other
// asset reads from <neural_dir>/<ASSET> and is never conflated with BTC's
// folder. A missing file or folder reads as "no signal" (level 0 / empty).
// =============================================================================

use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use tracing::debug;

pub struct SignalSource {
    neural_dir: PathBuf,
}

impl SignalSource {
    pub fn new(neural_dir: impl AsRef<Path>) -> Self {
        Self {
            neural_dir: neural_dir.as_ref().to_path_buf(),
        }
    }

    fn asset_folder(&self, asset: &str) -> PathBuf {
        let asset = asset.trim().to_uppercase();
        if asset == "BTC" {
            self.neural_dir.clone()
        } else {
            self.neural_dir.join(asset)
        }
    }

    /// Long-side level 0..7. Missing or unparseable files read as 0.
    pub fn long_level(&self, asset: &str) -> u8 {
        self.read_level(asset, "long_dca_signal.txt")
    }

    /// Short-side level 0..7. Missing or unparseable files read as 0.
    pub fn short_level(&self, asset: &str) -> u8 {
        self.read_level(asset, "short_dca_signal.txt")
    }

    fn read_level(&self, asset: &str, file: &str) -> u8 {
        let path = self.asset_folder(asset).join(file);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return 0,
        };
        // The model sometimes writes "4.0"; accept float spellings.
        raw.trim()
            .parse::<f64>()
            .map(|v| v as i64)
            .ok()
            .filter(|v| *v >= 0)
            .map(|v| v.min(u8::MAX as i64) as u8)
            .unwrap_or(0)
    }

    /// Long price levels, highest first (N1..N7). De-duplicated; any token
    /// that fails to parse is skipped.
    pub fn long_price_levels(&self, asset: &str) -> Vec<Decimal> {
        let path = self.asset_folder(asset).join("low_bound_prices.html");
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };

        let cleaned: String = raw
            .trim()
            .trim_matches(|c| matches!(c, '[' | ']' | '(' | ')'))
            .chars()
            .map(|c| match c {
                ',' | ';' | '|' | '\n' | '\t' => ' ',
                other => other,
            })
            .collect();

        let mut seen = Vec::new();
        let mut out: Vec<Decimal> = Vec::new();
        for token in cleaned.split_whitespace() {
            if let Ok(value) = token.parse::<Decimal>() {
                let key = value.round_dp(12);
                if seen.contains(&key) {
                    continue;
                }
                seen.push(key);
                out.push(value);
            }
        }

        out.sort_by(|a, b| b.cmp(a));
        debug!(asset, count = out.len(), "long price levels parsed");
        out
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn btc_reads_from_the_neural_dir_itself() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "long_dca_signal.txt", "5\n");
        let source = SignalSource::new(dir.path());
        assert_eq!(source.long_level("BTC"), 5);
    }

    #[test]
    fn other_assets_use_their_own_subfolder() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "long_dca_signal.txt", "7");
        write(dir.path(), "ETH/long_dca_signal.txt", "3");
        let source = SignalSource::new(dir.path());
        assert_eq!(source.long_level("ETH"), 3);
        // Missing folder never falls back to BTC's files.
        assert_eq!(source.long_level("DOGE"), 0);
    }

    #[test]
    fn float_spellings_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "short_dca_signal.txt", " 2.0 ");
        let source = SignalSource::new(dir.path());
        assert_eq!(source.short_level("btc"), 2);
    }

    #[test]
    fn garbage_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "long_dca_signal.txt", "not a number");
        let source = SignalSource::new(dir.path());
        assert_eq!(source.long_level("BTC"), 0);
        assert_eq!(source.long_level("MISSING"), 0);
    }

    #[test]
    fn price_levels_sorted_descending_and_deduped() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "low_bound_prices.html",
            "[48000, 50000 | 49000; 50000\n47000]",
        );
        let source = SignalSource::new(dir.path());
        let levels = source.long_price_levels("BTC");
        assert_eq!(
            levels,
            vec![
                Decimal::from(50000),
                Decimal::from(49000),
                Decimal::from(48000),
                Decimal::from(47000),
            ]
        );
    }

    #[test]
    fn price_levels_skip_unparseable_tokens() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "low_bound_prices.html", "100.5 <br> 99.5");
        let source = SignalSource::new(dir.path());
        let levels = source.long_price_levels("BTC");
        assert_eq!(
            levels,
            vec!["100.5".parse::<Decimal>().unwrap(), "99.5".parse().unwrap()]
        );
    }

    #[test]
    fn missing_levels_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let source = SignalSource::new(dir.path());
        assert!(source.long_price_levels("BTC").is_empty());
    }
}
