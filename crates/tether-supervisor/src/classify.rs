//! Hardware error classifier.
//!
//! Maps a raw daemon log line to a typed [`HardwareError`], or `None`.
//! The pattern table is ordered; the first subsystem match wins. A line
//! carrying only a generic failure marker produces a generic error, and
//! only when no specific diagnosis is already attached; a precise
//! diagnosis is never overwritten by a vaguer one.
//!
//! Pure and deterministic: the caller passes the currently attached error
//! kind explicitly instead of the classifier reading shared state.

use std::sync::LazyLock;

use regex::Regex;

use tether_core::{HardwareError, HardwareErrorKind};

/// One entry of the ordered subsystem pattern table.
struct FaultPattern {
    kind: HardwareErrorKind,
    regex: Regex,
    action: &'static str,
    focus: &'static str,
}

fn compile(
    kind: HardwareErrorKind,
    pattern: &'static str,
    action: &'static str,
    focus: &'static str,
) -> Option<FaultPattern> {
    match Regex::new(pattern) {
        Ok(regex) => Some(FaultPattern {
            kind,
            regex,
            action,
            focus,
        }),
        Err(e) => {
            tracing::error!(pattern, error = %e, "invalid fault pattern, skipping");
            None
        }
    }
}

/// Ordered subsystem patterns, most specific subsystems first.
static FAULT_PATTERNS: LazyLock<Vec<FaultPattern>> = LazyLock::new(|| {
    [
        (
            HardwareErrorKind::Camera,
            r"(?i)camera (?:timeout|not found|init(?:ialization)? failed)|no frames? received|v4l2",
            "Check that the camera cable is seated, then retry.",
            "camera",
        ),
        (
            HardwareErrorKind::MotorBus,
            r"(?i)motor bus|servo (?:timeout|overload|not responding)|failed to open serial port|bus error",
            "Check the motor power supply and cabling, then retry.",
            "motors",
        ),
        (
            HardwareErrorKind::Imu,
            r"(?i)\bimu\b|i2c (?:timeout|read failed|bus)",
            "The orientation sensor is not responding. Power-cycle the robot, then retry.",
            "imu",
        ),
        (
            HardwareErrorKind::Audio,
            r"(?i)audio device|no sound card|\balsa\b",
            "No audio device was found. Check the speaker connection, then retry.",
            "audio",
        ),
    ]
    .into_iter()
    .filter_map(|(kind, pattern, action, focus)| compile(kind, pattern, action, focus))
    .collect()
});

/// Generic runtime failure markers: an exception signature with no
/// subsystem attribution.
static GENERIC_MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"Traceback \(most recent call last\)|RuntimeError|panicked at")
        .map_err(|e| tracing::error!(error = %e, "invalid generic marker pattern"))
        .ok()
});

/// Classifies a daemon log line.
///
/// `active` is the kind of the hardware error currently attached, if any;
/// it gates the generic fallback so a specific diagnosis survives noisy
/// exception spew that follows it.
#[must_use]
pub fn classify(line: &str, active: Option<HardwareErrorKind>) -> Option<HardwareError> {
    for pattern in FAULT_PATTERNS.iter() {
        if pattern.regex.is_match(line) {
            return Some(
                HardwareError::new(pattern.kind, line, pattern.action).with_focus(pattern.focus),
            );
        }
    }

    if let Some(marker) = GENERIC_MARKER.as_ref() {
        if marker.is_match(line) && active.map_or(true, |kind| !kind.is_specific()) {
            return Some(HardwareError::generic(line));
        }
    }

    None
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_table_compiles() {
        assert_eq!(FAULT_PATTERNS.len(), 4);
        assert!(GENERIC_MARKER.is_some());
    }

    #[test]
    fn test_fixture_table() {
        // (line, expected kind)
        let fixtures = [
            (
                "ERROR camera timeout while grabbing frame",
                HardwareErrorKind::Camera,
            ),
            ("v4l2: device /dev/video0 disappeared", HardwareErrorKind::Camera),
            ("no frames received for 5s", HardwareErrorKind::Camera),
            (
                "motor bus timeout on /dev/ttyUSB0",
                HardwareErrorKind::MotorBus,
            ),
            (
                "failed to open serial port /dev/ttyACM0",
                HardwareErrorKind::MotorBus,
            ),
            ("servo overload detected on joint 3", HardwareErrorKind::MotorBus),
            ("IMU calibration failed", HardwareErrorKind::Imu),
            ("i2c timeout reading register 0x3b", HardwareErrorKind::Imu),
            ("no sound card detected", HardwareErrorKind::Audio),
            ("ALSA lib pcm.c: snd_pcm_open failed", HardwareErrorKind::Audio),
            (
                "RuntimeError: something went sideways",
                HardwareErrorKind::Generic,
            ),
            (
                "Traceback (most recent call last):",
                HardwareErrorKind::Generic,
            ),
        ];

        for (line, expected) in fixtures {
            let error = classify(line, None)
                .unwrap_or_else(|| panic!("line should classify: {line}"));
            assert_eq!(error.kind, expected, "line: {line}");
            assert_eq!(error.raw_message, line);
            assert!(!error.suggested_action.is_empty());
        }
    }

    #[test]
    fn test_unmatched_lines_yield_none() {
        for line in [
            "INFO daemon listening on 127.0.0.1:8000",
            "state published",
            "",
        ] {
            assert_eq!(classify(line, None), None, "line: {line}");
        }
    }

    #[test]
    fn test_first_match_wins() {
        // Matches both camera and generic markers; camera is first.
        let line = "RuntimeError: camera timeout";
        let error = classify(line, None).unwrap();
        assert_eq!(error.kind, HardwareErrorKind::Camera);
    }

    #[test]
    fn test_generic_suppressed_while_specific_active() {
        let line = "Traceback (most recent call last):";
        assert_eq!(classify(line, Some(HardwareErrorKind::Camera)), None);
        assert_eq!(classify(line, Some(HardwareErrorKind::MotorBus)), None);
    }

    #[test]
    fn test_generic_allowed_over_generic_or_none() {
        let line = "RuntimeError: boom";
        assert!(classify(line, None).is_some());
        assert!(classify(line, Some(HardwareErrorKind::Generic)).is_some());
    }

    #[test]
    fn test_specific_match_ignores_active() {
        // A specific diagnosis is produced even while another is attached;
        // precedence between specifics is the state machine's concern.
        let line = "motor bus timeout";
        let error = classify(line, Some(HardwareErrorKind::Camera)).unwrap();
        assert_eq!(error.kind, HardwareErrorKind::MotorBus);
    }

    #[test]
    fn test_focus_targets() {
        let error = classify("camera timeout", None).unwrap();
        assert_eq!(error.focus_target.as_deref(), Some("camera"));
        let error = classify("servo timeout on joint 1", None).unwrap();
        assert_eq!(error.focus_target.as_deref(), Some("motors"));
    }

    #[test]
    fn test_classifier_is_deterministic() {
        let line = "camera timeout";
        assert_eq!(classify(line, None), classify(line, None));
    }
}
