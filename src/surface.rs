//! Scratch-pad ("memo") surface: pointer and touch movement turned into polyline ink.
//!
//! Mouse coordinates arrive surface-local; touch coordinates arrive in client
//! space and are shifted by the surface origin. Resizing the surface wipes the
//! ink and restores the base stroke style, like a raster canvas does.
//!
//! Owners get a `MemoEraser` (see `SurfaceHandle`) and nothing else mutable.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::protocol::ServerWsMessage;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

impl Point {
  pub fn new(x: f32, y: f32) -> Self { Self { x, y } }

  fn offset_by(self, origin: Point) -> Point { Point::new(self.x - origin.x, self.y - origin.y) }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct Size {
  pub width: f32,
  pub height: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineCap {
  Round,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineJoin {
  Round,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StrokeStyle {
  pub color: String,
  pub width: f32,
  pub cap: LineCap,
  pub join: LineJoin,
}

impl StrokeStyle {
  pub fn round(color: impl Into<String>, width: f32) -> Self {
    Self { color: color.into(), width, cap: LineCap::Round, join: LineJoin::Round }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Segment {
  pub from: Point,
  pub to: Point,
}

#[derive(Clone, Debug, PartialEq, Serialize, Default)]
pub struct Stroke {
  pub points: Vec<Point>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointerInput {
  Down { x: f32, y: f32 },
  Move { x: f32, y: f32 },
  Up,
  Leave,
  TouchStart { touches: Vec<Point> },
  TouchMove { touches: Vec<Point> },
  TouchEnd,
}

pub struct StrokeSurface {
  size: Size,
  origin: Point,
  base_style: StrokeStyle,
  style: StrokeStyle,
  drawing: bool,
  last: Option<Point>,
  strokes: Vec<Stroke>,
}

impl StrokeSurface {
  pub fn new(base_style: StrokeStyle) -> Self {
    Self {
      size: Size::default(),
      origin: Point::default(),
      style: base_style.clone(),
      base_style,
      drawing: false,
      last: None,
      strokes: Vec::new(),
    }
  }

  /// Match the container's current size and on-screen origin.
  pub fn fit_to(&mut self, container: Size, origin: Point) {
    self.size = container;
    self.origin = origin;
    self.style = self.base_style.clone();
    self.clear_ink();
  }

  pub fn apply(&mut self, input: PointerInput) -> Option<Segment> {
    match input {
      PointerInput::Down { x, y } => {
        self.begin(Point::new(x, y));
        None
      }
      PointerInput::Move { x, y } => self.extend(Point::new(x, y)),
      PointerInput::TouchStart { touches } => {
        if let Some(p) = self.first_touch(&touches) {
          self.begin(p);
        }
        None
      }
      PointerInput::TouchMove { touches } => {
        let p = self.first_touch(&touches)?;
        self.extend(p)
      }
      PointerInput::Up | PointerInput::Leave | PointerInput::TouchEnd => {
        self.drawing = false;
        None
      }
    }
  }

  /// Clears rendered ink only; drawing mode is untouched.
  pub fn erase(&mut self) { self.clear_ink() }

  #[cfg(test)]
  pub fn is_drawing(&self) -> bool { self.drawing }
  pub fn size(&self) -> Size { self.size }
  pub fn style(&self) -> &StrokeStyle { &self.style }
  pub fn strokes(&self) -> &[Stroke] { &self.strokes }

  fn first_touch(&self, touches: &[Point]) -> Option<Point> {
    touches.first().map(|t| t.offset_by(self.origin))
  }

  fn begin(&mut self, p: Point) {
    self.drawing = true;
    self.last = Some(p);
    self.strokes.push(Stroke { points: vec![p] });
  }

  fn extend(&mut self, p: Point) -> Option<Segment> {
    if !self.drawing {
      return None;
    }
    let from = self.last.replace(p)?;
    match self.strokes.last_mut() {
      Some(stroke) => stroke.points.push(p),
      None => self.strokes.push(Stroke { points: vec![from, p] }),
    }
    Some(Segment { from, to: p })
  }

  fn clear_ink(&mut self) {
    self.strokes.clear();
    // An in-progress stroke continues from its last point into fresh ink.
    if let (true, Some(p)) = (self.drawing, self.last) {
      self.strokes.push(Stroke { points: vec![p] });
    }
  }
}

/// Erase capability handed to the surface's owner.
pub trait MemoEraser: Send + Sync {
  fn erase(&self);
}

#[derive(Clone, Debug, Serialize)]
pub struct MemoSnapshot {
  pub size: Size,
  pub style: StrokeStyle,
  pub strokes: Vec<Stroke>,
}

/// Shared handle: input routes feed it pointer events, the controller only erases.
#[derive(Clone)]
pub struct SurfaceHandle {
  surface: Arc<Mutex<StrokeSurface>>,
  events: Option<broadcast::Sender<ServerWsMessage>>,
}

impl SurfaceHandle {
  pub fn new(surface: StrokeSurface, events: Option<broadcast::Sender<ServerWsMessage>>) -> Self {
    Self { surface: Arc::new(Mutex::new(surface)), events }
  }

  fn lock(&self) -> MutexGuard<'_, StrokeSurface> {
    self.surface.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  pub fn apply(&self, input: PointerInput) -> Option<Segment> { self.lock().apply(input) }

  pub fn fit_to(&self, container: Size, origin: Point) {
    self.lock().fit_to(container, origin);
    debug!(target: "memo", width = container.width, height = container.height, "Memo resized");
  }

  pub fn snapshot(&self) -> MemoSnapshot {
    let s = self.lock();
    MemoSnapshot { size: s.size(), style: s.style().clone(), strokes: s.strokes().to_vec() }
  }
}

impl MemoEraser for SurfaceHandle {
  fn erase(&self) {
    self.lock().erase();
    if let Some(tx) = &self.events {
      let _ = tx.send(ServerWsMessage::MemoCleared);
    }
    debug!(target: "memo", "Memo erased");
  }
}
