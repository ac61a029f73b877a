//! Layout tilers: pure functions from a work area and a window count to a
//! list of rectangles. Layouts are computed in relative coordinates
//! (0.0..1.0, left/top/right/bottom) and plugged into the physical work
//! area, rotating 90° for portrait monitors.

use crate::Rect;

/// Relative rectangle, left/top/right/bottom in 0.0..=1.0.
pub type RelRect = (f64, f64, f64, f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Dwindle,
    WidescreenDwindle,
    ObsDwindle,
    Monocle,
    Static8,
}

impl LayoutKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dwindle => "dwindle",
            Self::WidescreenDwindle => "widescreen_dwindle",
            Self::ObsDwindle => "obs_dwindle",
            Self::Monocle => "monocle",
            Self::Static8 => "static_8",
        }
    }
}

/// The dwindle layout: split the dominant axis in half, first window takes
/// the near half, recurse on the far half with the axis flipped.
///
/// ```text
///     +-----------+-----------+
///     |           |           |
///     |           |     2     |
///     |           |           |
///     |     1     +-----+-----+
///     |           |     |  4  |
///     |           |  3  +--+--+
///     |           |     | 5|-.|
///     +-----------+-----+-----+
/// ```
pub fn dwindle(n: usize, master_ratio: f64) -> Vec<RelRect> {
    let ratio = 1.0 - master_ratio;
    let (mut l, mut t, r, b) = (0.0, 0.0, 1.0, 1.0);
    let mut rects = Vec::with_capacity(n);
    for i in 0..n {
        if i + 1 == n {
            // last window takes whatever is left
            rects.push((l, t, r, b));
        } else if i % 2 == 0 {
            let nl = r - (r - l) * ratio;
            rects.push((l, t, nl, b));
            l = nl;
        } else {
            let nb = b - (b - t) * ratio;
            rects.push((l, t, r, nb));
            t = nb;
        }
    }
    rects
}

/// Widescreen dwindle: the master occupies a full-height left column and
/// the remaining windows dwindle-tile the rest.
pub fn widescreen_dwindle(n: usize, master_ratio: f64) -> Vec<RelRect> {
    match n {
        0 => Vec::new(),
        1 => vec![(0.0, 0.0, 1.0, 1.0)],
        _ => {
            let mut rects = vec![(0.0, 0.0, master_ratio, 1.0)];
            let rest = (master_ratio, 0.0, 1.0, 1.0);
            rects.extend(
                dwindle(n - 1, 0.5)
                    .into_iter()
                    .map(|r| plug_rel(r, rest)),
            );
            rects
        }
    }
}

/// Every window gets the whole work area; only the active one is visible.
pub fn monocle(n: usize) -> Vec<RelRect> {
    vec![(0.0, 0.0, 1.0, 1.0); n]
}

/// A fixed template for very large screens, optimal at 8 windows. The
/// upper horizontal cut sits at the eye line so the main working slots stay
/// below it.
///
/// ```text
///     +----------+----------+----------+----------+
///     |     6    |     7    |     8    |          |
///     +----------+--+-----+-+----------+          |
///     |             |     |            |          |
///     |             |  3  |      1     |     4    |
///     |     5       |     |            |          |
///     |             +-----+------------|          |
///     |             |         2        |          |
///     +-------------+------------------+----------+
/// ```
pub fn static_8(n: usize) -> Vec<RelRect> {
    let slots = [
        (0.45, 0.37, 0.75, 0.80),
        (0.30, 0.80, 0.75, 1.00),
        (0.30, 0.37, 0.45, 0.80),
        (0.75, 0.00, 1.00, 1.00),
        (0.00, 0.37, 0.30, 1.00),
        (0.00, 0.00, 0.25, 0.37),
        (0.25, 0.00, 0.50, 0.37),
        (0.50, 0.00, 0.75, 0.37),
    ];
    match n {
        0 => Vec::new(),
        // with one or two windows the center block widens to fill the gap
        1 => vec![(0.25, 0.37, 0.75, 1.00)],
        2 => vec![(0.25, 0.37, 0.75, 0.80), (0.25, 0.80, 0.75, 1.00)],
        n => slots[..n.min(8)].to_vec(),
    }
}

/// Plug a relative rect into a relative container.
fn plug_rel(src: RelRect, target: RelRect) -> RelRect {
    let (sl, st, sr, sb) = src;
    let (tl, tt, tr, tb) = target;
    let (tw, th) = (tr - tl, tb - tt);
    (tl + sl * tw, tt + st * th, tl + sr * tw, tt + sb * th)
}

/// Plug a relative rect into a physical work area.
pub fn plug_rect(src: RelRect, target: Rect) -> Rect {
    let (sl, st, sr, sb) = src;
    let (tw, th) = (target.width() as f64, target.height() as f64);
    Rect::new(
        target.left + (sl * tw).round() as i32,
        target.top + (st * th).round() as i32,
        target.left + (sr * tw).round() as i32,
        target.top + (sb * th).round() as i32,
    )
}

/// Compute physical tiling areas for `n` windows. Relative layouts rotate
/// 90° on portrait monitors; the OBS layout works in physical pixels
/// because its reserved recording area has a fixed size.
pub fn tile(kind: LayoutKind, workarea: Rect, n: usize) -> Vec<Rect> {
    if n == 0 {
        return Vec::new();
    }
    if kind == LayoutKind::ObsDwindle {
        return obs_tile(workarea, n, 1920, 1080);
    }
    let mut rects = match kind {
        LayoutKind::Dwindle => dwindle(n, 0.5),
        LayoutKind::WidescreenDwindle => widescreen_dwindle(n, 0.4),
        LayoutKind::Monocle => monocle(n),
        LayoutKind::Static8 => static_8(n),
        LayoutKind::ObsDwindle => unreachable!(),
    };
    if workarea.width() < workarea.height() {
        rects = rects.iter().map(|&(l, t, r, b)| (t, l, b, r)).collect();
    }
    rects.into_iter().map(|r| plug_rect(r, workarea)).collect()
}

/// The OBS recording layout: window 1 fills the left strip, window 2 the
/// area under the reserved recording region, and the rest dwindle-tile
/// inside the recording region itself.
fn obs_tile(workarea: Rect, n: usize, obs_width: i32, obs_height: i32) -> Vec<Rect> {
    if obs_width >= workarea.width() || obs_height >= workarea.height() {
        // work area too small to reserve the recording region
        return tile(LayoutKind::Dwindle, workarea, n);
    }
    let mut rects = Vec::with_capacity(n);
    let fr = workarea.right - obs_width;
    rects.push(Rect::new(workarea.left, workarea.top, fr, workarea.bottom));
    if n == 1 {
        return rects;
    }
    rects.push(Rect::new(
        fr,
        workarea.top + obs_height,
        workarea.right,
        workarea.bottom,
    ));
    if n == 2 {
        return rects;
    }
    let obs_rect = Rect::new(fr, workarea.top, workarea.right, workarea.top + obs_height);
    rects.extend(
        dwindle(n - 2, 0.5)
            .into_iter()
            .map(|r| plug_rect(r, obs_rect)),
    );
    rects
}

/// Shrink every rect by half the gap on each edge shared with a neighbor;
/// edges flush with the work area stay flush.
pub fn apply_gap(rects: &mut [Rect], workarea: Rect, gap: i32) {
    if gap <= 0 {
        return;
    }
    let half = gap / 2;
    for r in rects.iter_mut() {
        if r.left != workarea.left {
            r.left += half;
        }
        if r.top != workarea.top {
            r.top += half;
        }
        if r.right != workarea.right {
            r.right -= half;
        }
        if r.bottom != workarea.bottom {
            r.bottom -= half;
        }
    }
}

/// What a theme needs to know about a monitor to bid for it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenProfile {
    pub width_px: i32,
    pub height_px: i32,
    /// Diagonal in inches, rounded.
    pub inch: u32,
    /// width / height in physical pixels.
    pub ratio: f64,
    pub dpi: u32,
    pub is_primary: bool,
}

impl Default for ScreenProfile {
    fn default() -> Self {
        Self {
            width_px: 1920,
            height_px: 1080,
            inch: 24,
            ratio: 1920.0 / 1080.0,
            dpi: 96,
            is_primary: true,
        }
    }
}

/// A theme packs a tiler with the presentation options users switch
/// between as a unit.
#[derive(Debug, Clone)]
pub struct Theme {
    pub name: &'static str,
    pub layout: LayoutKind,
    /// Gap between adjacent windows, in pixels.
    pub gap: i32,
    /// Upper bound on windows that get their own tiling area; the surplus
    /// is stacked in the last area. Zero means unbounded.
    pub max_tiling_areas: usize,
    /// Windows with a pinned slot index go to exactly that area.
    pub static_layout: bool,
    /// Prepend newly managed windows instead of appending them.
    pub new_window_as_master: bool,
    /// Re-assert rects when a drag ends inside the same monitor.
    pub strict: bool,
    /// Bid for a monitor; the highest bid across themes wins, declaration
    /// order breaks ties.
    pub affinity: fn(&ScreenProfile) -> i32,
}

pub fn default_themes() -> Vec<Theme> {
    vec![
        Theme {
            name: "static_bigscreen_8",
            layout: LayoutKind::Static8,
            gap: 2,
            max_tiling_areas: 8,
            static_layout: true,
            new_window_as_master: true,
            strict: true,
            affinity: |si| if si.inch >= 40 { 10 } else { 0 },
        },
        Theme {
            name: "dwindle",
            layout: LayoutKind::Dwindle,
            gap: 4,
            max_tiling_areas: 3,
            static_layout: false,
            new_window_as_master: true,
            strict: true,
            affinity: |si| {
                (if si.inch >= 20 { 4 } else { 0 })
                    + (if si.ratio > 1.0 && si.ratio < 2.0 { 5 } else { 0 })
            },
        },
        Theme {
            name: "widescreen_dwindle",
            layout: LayoutKind::WidescreenDwindle,
            gap: 2,
            max_tiling_areas: 4,
            static_layout: false,
            new_window_as_master: true,
            strict: true,
            affinity: |si| {
                (if si.inch >= 20 { 4 } else { 0 })
                    + (if si.ratio < 1.0 || si.ratio >= 2.0 { 5 } else { 0 })
            },
        },
        Theme {
            name: "obs_dwindle",
            layout: LayoutKind::ObsDwindle,
            gap: 2,
            max_tiling_areas: 0,
            static_layout: false,
            new_window_as_master: false,
            strict: true,
            affinity: |_| 0,
        },
        Theme {
            name: "monocle",
            layout: LayoutKind::Monocle,
            gap: 0,
            max_tiling_areas: 0,
            static_layout: false,
            new_window_as_master: false,
            strict: true,
            affinity: |si| if si.inch < 20 { 10 } else { 0 },
        },
    ]
}

/// Pick the theme with the highest affinity for the monitor. Ties go to
/// the earliest declared theme.
pub fn theme_for_monitor(themes: &[Theme], profile: &ScreenProfile) -> usize {
    let mut best = 0;
    let mut best_score = i32::MIN;
    for (i, theme) in themes.iter().enumerate() {
        let score = (theme.affinity)(profile);
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dwindle_three_windows_landscape() {
        let rects = tile(LayoutKind::Dwindle, Rect::new(0, 0, 1920, 1080), 3);
        assert_eq!(
            rects,
            vec![
                Rect::new(0, 0, 960, 1080),
                Rect::new(960, 0, 1920, 540),
                Rect::new(960, 540, 1920, 1080),
            ]
        );
    }

    #[test]
    fn dwindle_single_window_fills_workarea() {
        let wa = Rect::new(100, 50, 1000, 700);
        assert_eq!(tile(LayoutKind::Dwindle, wa, 1), vec![wa]);
    }

    #[test]
    fn dwindle_rotates_on_portrait() {
        let rects = tile(LayoutKind::Dwindle, Rect::new(0, 0, 1080, 1920), 2);
        // split goes across the tall axis instead
        assert_eq!(
            rects,
            vec![
                Rect::new(0, 0, 1080, 960),
                Rect::new(0, 960, 1080, 1920),
            ]
        );
    }

    #[test]
    fn widescreen_master_column_then_dwindle() {
        let rects = tile(LayoutKind::WidescreenDwindle, Rect::new(0, 0, 1000, 500), 3);
        assert_eq!(rects[0], Rect::new(0, 0, 400, 500));
        assert_eq!(rects[1], Rect::new(400, 0, 700, 500));
        assert_eq!(rects[2], Rect::new(700, 0, 1000, 500));
    }

    #[test]
    fn monocle_gives_everyone_the_workarea() {
        let wa = Rect::new(0, 0, 800, 600);
        let rects = tile(LayoutKind::Monocle, wa, 4);
        assert_eq!(rects.len(), 4);
        assert!(rects.iter().all(|r| *r == wa));
    }

    #[test]
    fn static_8_slot_count_tracks_window_count() {
        for n in 1..=8 {
            assert_eq!(static_8(n).len(), n, "n = {n}");
        }
        assert_eq!(static_8(12).len(), 8);
    }

    #[test]
    fn obs_reserves_recording_region() {
        let wa = Rect::new(0, 0, 3440, 1440);
        let rects = tile(LayoutKind::ObsDwindle, wa, 4);
        assert_eq!(rects[0], Rect::new(0, 0, 1520, 1440));
        assert_eq!(rects[1], Rect::new(1520, 1080, 3440, 1440));
        // remaining windows tile the 1920x1080 recording region
        assert_eq!(rects[2], Rect::new(1520, 0, 2480, 1080));
        assert_eq!(rects[3], Rect::new(2480, 0, 3440, 1080));
    }

    #[test]
    fn obs_falls_back_when_workarea_is_small() {
        let wa = Rect::new(0, 0, 1280, 720);
        assert_eq!(
            tile(LayoutKind::ObsDwindle, wa, 2),
            tile(LayoutKind::Dwindle, wa, 2)
        );
    }

    #[test]
    fn gap_shrinks_inner_edges_only() {
        let wa = Rect::new(0, 0, 1920, 1080);
        let mut rects = tile(LayoutKind::Dwindle, wa, 2);
        apply_gap(&mut rects, wa, 8);
        assert_eq!(rects[0], Rect::new(0, 0, 956, 1080));
        assert_eq!(rects[1], Rect::new(964, 0, 1920, 1080));
    }

    #[test]
    fn affinity_prefers_highest_bid() {
        let themes = default_themes();
        let small = ScreenProfile {
            inch: 14,
            ..Default::default()
        };
        assert_eq!(themes[theme_for_monitor(&themes, &small)].name, "monocle");
        let tv = ScreenProfile {
            inch: 55,
            ..Default::default()
        };
        assert_eq!(
            themes[theme_for_monitor(&themes, &tv)].name,
            "static_bigscreen_8"
        );
        let ultrawide = ScreenProfile {
            width_px: 3440,
            height_px: 1440,
            inch: 34,
            ratio: 3440.0 / 1440.0,
            ..Default::default()
        };
        assert_eq!(
            themes[theme_for_monitor(&themes, &ultrawide)].name,
            "widescreen_dwindle"
        );
    }

    #[test]
    fn affinity_tie_breaks_by_declaration_order() {
        let mk = |name: &'static str| Theme {
            name,
            layout: LayoutKind::Dwindle,
            gap: 0,
            max_tiling_areas: 0,
            static_layout: false,
            new_window_as_master: false,
            strict: false,
            affinity: |_| 1,
        };
        let themes = vec![mk("first"), mk("second")];
        assert_eq!(theme_for_monitor(&themes, &ScreenProfile::default()), 0);
    }
}
