//! Per-track behavior: ROI occupancy with loitering, and tripwire crossing.

use tracing::debug;

use crate::{
    geometry::{point_in_polygon, NormPoint, Tripwire},
    tracker::{CrossingDirection, TrackEvent, TrackState},
    LINE_EPSILON, LOITERING_THRESHOLD_MS, TRIPWIRE_ALERT_DEBOUNCE_MS,
};

/// Apply the enter/exit transitions of the ROI occupancy state machine.
pub(crate) fn update_roi_status(track: &mut TrackState, roi: &[NormPoint], now_ms: i64) {
    let now_inside = point_in_polygon(&track.centroid, roi);

    if now_inside && !track.inside_roi {
        track.entered_roi_ms = now_ms;
        track.loiter_alert_sent = false;
        debug!(track = track.id, "entered roi");
    } else if !now_inside && track.inside_roi {
        track.entered_roi_ms = 0;
        track.loiter_alert_sent = false;
        debug!(track = track.id, "exited roi");
    }

    track.inside_roi = now_inside;
}

/// Emit a loitering event once per ROI occupancy, after the dwell threshold.
pub(crate) fn check_loitering(track: &mut TrackState, now_ms: i64) -> Option<TrackEvent> {
    if !track.inside_roi || track.loiter_alert_sent {
        return None;
    }

    let duration_ms = now_ms - track.entered_roi_ms;
    if duration_ms < LOITERING_THRESHOLD_MS {
        return None;
    }

    track.loiter_alert_sent = true;
    Some(TrackEvent::Loitering {
        track_id: track.id,
        label: track.label.clone(),
        duration_ms,
    })
}

/// Emit a tripwire crossing when the centroid moved across the line.
pub(crate) fn check_line_crossing(
    track: &mut TrackState,
    wire: &Tripwire,
    now_ms: i64,
) -> Option<TrackEvent> {
    // A freshly created track has prev == current; no crossing can exist yet.
    if track.centroid == track.prev_centroid {
        return None;
    }
    if now_ms - track.last_tripwire_alert_ms < TRIPWIRE_ALERT_DEBOUNCE_MS {
        return None;
    }

    let prev_side = wire.side(&track.prev_centroid);
    let cur_side = wire.side(&track.centroid);

    if prev_side.abs() > LINE_EPSILON
        && cur_side.abs() > LINE_EPSILON
        && prev_side * cur_side < 0.0
    {
        let direction = if prev_side < 0.0 && cur_side > 0.0 {
            CrossingDirection::LeftToRight
        } else if prev_side > 0.0 && cur_side < 0.0 {
            CrossingDirection::RightToLeft
        } else {
            CrossingDirection::Unknown
        };

        track.last_tripwire_alert_ms = now_ms;
        debug!(
            track = track.id,
            direction = direction.as_str(),
            prev_side,
            cur_side,
            "track crossed tripwire"
        );
        return Some(TrackEvent::TripwireCrossed {
            track_id: track.id,
            label: track.label.clone(),
            direction,
        });
    }

    None
}
