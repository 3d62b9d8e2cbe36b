use crate::models::SpectralAxis;
use crate::models::quantity::parse_frequency_hz;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Cannot parse continuum range '{0}'")]
    Malformed(String),

    #[error("Frequency selection '{0}' needs the spectral axis of the image")]
    MissingSpectralAxis(String),
}

/// Convert a continuum selection into inclusive channel ranges of an image.
///
/// Accepts plain channel ranges (`100~200;300~400`) and frequency ranges
/// (`230.1~230.5GHz;231.0~231.2GHz`, unit on the upper end). Frequency ranges
/// are clipped to the spectral axis; ranges entirely outside it are dropped.
pub fn continuum_channel_ranges(
    selection: &str,
    axis: Option<&SpectralAxis>,
) -> Result<Vec<(u32, u32)>, ChannelError> {
    let mut ranges = Vec::new();

    for part in selection.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (low, high) = part.split_once('~').unwrap_or((part, part));
        let (low, high) = (low.trim(), high.trim());

        if high.ends_with(|c: char| c.is_ascii_alphabetic()) {
            let (low_hz, high_hz) = frequency_pair(low, high)?;
            let axis = axis.ok_or_else(|| ChannelError::MissingSpectralAxis(part.to_string()))?;
            if let Some(range) = channels_in_axis(low_hz, high_hz, axis) {
                ranges.push(range);
            }
        } else {
            let parse = |text: &str| {
                text.parse::<u32>()
                    .map_err(|_| ChannelError::Malformed(part.to_string()))
            };
            let (a, b) = (parse(low)?, parse(high)?);
            ranges.push((a.min(b), a.max(b)));
        }
    }

    Ok(ranges)
}

/// Both ends of `low~high<unit>` in Hz; the lower end may omit the unit.
fn frequency_pair(low: &str, high: &str) -> Result<(f64, f64), ChannelError> {
    let malformed = || ChannelError::Malformed(format!("{}~{}", low, high));

    let high_hz = parse_frequency_hz(high).map_err(|_| malformed())?;
    let unit = high.trim_start_matches(|c: char| !c.is_ascii_alphabetic());
    let low_hz = if low.ends_with(|c: char| c.is_ascii_alphabetic()) {
        parse_frequency_hz(low)
    } else {
        parse_frequency_hz(&format!("{}{}", low, unit))
    }
    .map_err(|_| malformed())?;
    Ok((low_hz, high_hz))
}

fn channels_in_axis(low_hz: f64, high_hz: f64, axis: &SpectralAxis) -> Option<(u32, u32)> {
    if axis.width_hz == 0.0 || axis.nchan == 0 {
        return None;
    }

    let index = |freq: f64| ((freq - axis.start_hz) / axis.width_hz).round() as i64;
    let (a, b) = (index(low_hz), index(high_hz));
    let (first, last) = (a.min(b), a.max(b));
    let top = i64::from(axis.nchan) - 1;
    if last < 0 || first > top {
        return None;
    }
    Some((first.max(0) as u32, last.min(top) as u32))
}

/// `[(100, 200), (300, 400)]` -> `"100~200;300~400"`.
pub fn format_channel_ranges(ranges: &[(u32, u32)]) -> String {
    ranges
        .iter()
        .map(|(a, b)| format!("{}~{}", a, b))
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis() -> SpectralAxis {
        SpectralAxis {
            start_hz: 230.0e9,
            width_hz: 1.0e6,
            nchan: 1000,
        }
    }

    #[test]
    fn test_plain_channel_ranges() {
        let ranges = continuum_channel_ranges("100~200; 300~400", None).unwrap();
        assert_eq!(ranges, vec![(100, 200), (300, 400)]);
        assert_eq!(format_channel_ranges(&ranges), "100~200;300~400");
    }

    #[test]
    fn test_single_channel_and_reversed_range() {
        assert_eq!(
            continuum_channel_ranges("150;20~10", None).unwrap(),
            vec![(150, 150), (10, 20)]
        );
    }

    #[test]
    fn test_frequency_ranges_use_axis() {
        let ranges = continuum_channel_ranges("230.1~230.2GHz", Some(&axis())).unwrap();
        assert_eq!(ranges, vec![(100, 200)]);
    }

    #[test]
    fn test_frequency_ranges_are_clipped() {
        let ranges =
            continuum_channel_ranges("229.5~230.05GHz;231.5~232GHz", Some(&axis())).unwrap();
        assert_eq!(ranges, vec![(0, 50)]);
    }

    #[test]
    fn test_frequency_ranges_need_axis() {
        assert!(matches!(
            continuum_channel_ranges("230.1~230.2GHz", None),
            Err(ChannelError::MissingSpectralAxis(_))
        ));
    }

    #[test]
    fn test_malformed_ranges() {
        assert!(matches!(
            continuum_channel_ranges("a~b", None),
            Err(ChannelError::Malformed(_))
        ));
        assert!(continuum_channel_ranges("", None).unwrap().is_empty());
    }
}
