//! Sliding-window running maximum
//!
//! `WindowTraversal` walks every cell of a grid exactly once along a
//! serpentine path (up column 0, right, down column 1, right, up column 2, …),
//! so consecutive windows always differ by a single row or column. Each step
//! reports the strip of cells that entered the window and the strip that
//! left it.
//!
//! `WindowedExtremum` rides on the traversal and keeps the maximum of a scalar
//! grid inside the current window. Most steps only look at the entering
//! strip; the whole window is rescanned only when the known maximum is in the
//! strip being left behind.

use crate::grid::smoothing::clipped_window;
use crate::grid::Grid;

/// Inclusive rectangle of grid cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub min_x: usize,
    pub max_x: usize,
    pub min_y: usize,
    pub max_y: usize,
}

impl CellRange {
    #[inline]
    #[must_use]
    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Cells in raster order (x fastest)
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.min_y..=self.max_y).flat_map(move |y| (self.min_x..=self.max_x).map(move |x| (x, y)))
    }

    fn row(&self, y: usize) -> Self {
        Self {
            min_y: y,
            max_y: y,
            ..*self
        }
    }

    fn column(&self, x: usize) -> Self {
        Self {
            min_x: x,
            max_x: x,
            ..*self
        }
    }
}

/// The move that produced the current position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// At (0, 0), nothing moved yet
    Start,
    /// y increased
    Up,
    /// y decreased
    Down,
    /// x increased
    Right,
}

/// Serpentine walk of a window of half-widths (hx, hy) over an nx × ny grid
#[derive(Debug, Clone)]
pub struct WindowTraversal {
    nx: usize,
    ny: usize,
    half_x: usize,
    half_y: usize,
    x: usize,
    y: usize,
    step: Step,
    current: CellRange,
    entering: Option<CellRange>,
    leaving: Option<CellRange>,
}

impl WindowTraversal {
    /// Start at (0, 0)
    ///
    /// Half-widths beyond the grid extent cover the whole axis and are clamped.
    #[must_use]
    pub fn new(nx: usize, ny: usize, half_x: usize, half_y: usize) -> Self {
        let mut traversal = Self {
            nx,
            ny,
            half_x: half_x.min(nx),
            half_y: half_y.min(ny),
            x: 0,
            y: 0,
            step: Step::Start,
            current: CellRange {
                min_x: 0,
                max_x: 0,
                min_y: 0,
                max_y: 0,
            },
            entering: None,
            leaving: None,
        };
        traversal.current = traversal.window_at(0, 0);
        traversal
    }

    fn window_at(&self, x: usize, y: usize) -> CellRange {
        let xs = clipped_window(x, self.half_x, self.nx);
        let ys = clipped_window(y, self.half_y, self.ny);
        CellRange {
            min_x: *xs.start(),
            max_x: *xs.end(),
            min_y: *ys.start(),
            max_y: *ys.end(),
        }
    }

    #[must_use]
    pub fn position(&self) -> (usize, usize) {
        (self.x, self.y)
    }

    #[must_use]
    pub fn step(&self) -> Step {
        self.step
    }

    /// Window around the current position
    #[must_use]
    pub fn current(&self) -> CellRange {
        self.current
    }

    /// Cells that joined the window on the last move
    #[must_use]
    pub fn entering(&self) -> Option<CellRange> {
        self.entering
    }

    /// Cells of the previous window that are no longer in it
    #[must_use]
    pub fn leaving(&self) -> Option<CellRange> {
        self.leaving
    }

    fn next_move(&self) -> Option<Step> {
        let up_room = self.y + 1 < self.ny;
        let down_room = self.y > 0;
        let right_room = self.x + 1 < self.nx;
        let vertical = match self.step {
            Step::Start | Step::Up => up_room.then_some(Step::Up),
            Step::Down => down_room.then_some(Step::Down),
            // Fresh column: go back the way the last one came from
            Step::Right if self.y == 0 => up_room.then_some(Step::Up),
            Step::Right => down_room.then_some(Step::Down),
        };
        vertical.or_else(|| right_room.then_some(Step::Right))
    }

    /// Move one cell; false once every cell has been visited
    pub fn advance(&mut self) -> bool {
        let Some(step) = self.next_move() else {
            return false;
        };
        match step {
            Step::Up => self.y += 1,
            Step::Down => self.y -= 1,
            Step::Right => self.x += 1,
            Step::Start => unreachable!("start is never a move"),
        }
        self.step = step;
        self.current = self.window_at(self.x, self.y);

        let (x, y, hx, hy) = (self.x, self.y, self.half_x, self.half_y);
        let cur = self.current;
        (self.entering, self.leaving) = match step {
            Step::Up => (
                (y + hy < self.ny).then(|| cur.row(y + hy)),
                (y > hy).then(|| cur.row(y - hy - 1)),
            ),
            Step::Down => (
                (y >= hy).then(|| cur.row(y - hy)),
                (y + hy + 1 < self.ny).then(|| cur.row(y + hy + 1)),
            ),
            Step::Right => (
                (x + hx < self.nx).then(|| cur.column(x + hx)),
                (x > hx).then(|| cur.column(x - hx - 1)),
            ),
            Step::Start => (None, None),
        };
        true
    }
}

/// Location and value of the current window maximum
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub value: f64,
    pub x: usize,
    pub y: usize,
}

/// How a step updated the running maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakUpdate {
    /// The maximum was in the leaving strip; whole window rescanned
    Rescan,
    /// No maximum known; entering strip scanned
    FromUnset,
    /// Maximum at the floor value 0; entering strip scanned for anything larger
    FromFloor,
    /// Maximum retained; entering strip scanned for anything larger
    Extend,
}

/// How often each update kind was taken during one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepCounts {
    pub total: usize,
    pub rescans: usize,
    pub from_unset: usize,
    pub from_floor: usize,
    pub extended: usize,
}

impl SweepCounts {
    fn record(&mut self, update: PeakUpdate) {
        self.total += 1;
        match update {
            PeakUpdate::Rescan => self.rescans += 1,
            PeakUpdate::FromUnset => self.from_unset += 1,
            PeakUpdate::FromFloor => self.from_floor += 1,
            PeakUpdate::Extend => self.extended += 1,
        }
    }

    pub fn log(&self) {
        let pct = |n: usize| 100.0 * n as f64 / self.total.max(1) as f64;
        tracing::debug!(
            total = self.total,
            rescan_pct = pct(self.rescans),
            unset_pct = pct(self.from_unset),
            floor_pct = pct(self.from_floor),
            extend_pct = pct(self.extended),
            "windowed maximum sweep"
        );
    }
}

/// Running maximum of a non-negative scalar grid over a sliding window
///
/// Missing cells never become the maximum; ties keep the first cell found.
#[derive(Debug, Clone, Default)]
pub struct WindowedExtremum {
    peak: Option<Peak>,
    counts: SweepCounts,
}

impl WindowedExtremum {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn peak(&self) -> Option<Peak> {
        self.peak
    }

    #[must_use]
    pub fn counts(&self) -> SweepCounts {
        self.counts
    }

    /// Establish the maximum of the traversal's current window from scratch
    pub fn reset(&mut self, grid: &Grid, traversal: &WindowTraversal) {
        self.peak = None;
        self.scan(grid, traversal.current());
    }

    /// Bring the maximum up to date after `traversal` advanced one step
    pub fn update(&mut self, grid: &Grid, traversal: &WindowTraversal) -> PeakUpdate {
        let update = self.decide(traversal);
        self.counts.record(update);
        match update {
            PeakUpdate::Rescan => self.reset(grid, traversal),
            PeakUpdate::FromUnset | PeakUpdate::FromFloor | PeakUpdate::Extend => {
                if let Some(range) = traversal.entering() {
                    self.scan(grid, range);
                }
            }
        }
        update
    }

    fn decide(&self, traversal: &WindowTraversal) -> PeakUpdate {
        match self.peak {
            Some(p) if traversal.leaving().is_some_and(|r| r.contains(p.x, p.y)) => {
                PeakUpdate::Rescan
            }
            None => PeakUpdate::FromUnset,
            // Zero is the lowest possible magnitude, so anything present beats it
            Some(p) if p.value == 0.0 => PeakUpdate::FromFloor,
            Some(_) => PeakUpdate::Extend,
        }
    }

    fn scan(&mut self, grid: &Grid, range: CellRange) {
        for (x, y) in range.cells() {
            if let Some(value) = grid.get(x, y) {
                self.offer(value, x, y);
            }
        }
    }

    fn offer(&mut self, value: f64, x: usize, y: usize) {
        match self.peak {
            Some(p) if value <= p.value => {}
            _ => self.peak = Some(Peak { value, x, y }),
        }
    }
}
