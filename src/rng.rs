// src/rng.rs
//
// Secure random + human timing primitives (spec.md §4.4). All randomness
// is drawn from the OS CSPRNG (rand::rngs::OsRng) — Math.random()-class
// generators are detectable by anti-bot fingerprinting, which is exactly
// the vector this module exists to close.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::RngCore;
use std::f64::consts::PI;
use std::time::Duration;

pub struct SecureRng {
    rng: OsRng,
}

#[derive(Debug, Clone, Copy)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone)]
pub struct MousePath {
    pub points: Vec<Point>,
    pub segment_durations: Vec<Duration>,
}

#[derive(Debug, Clone, Copy)]
pub struct MousePathOptions {
    pub overshoot_prob: f64,
    pub micro_pause_prob: f64,
}

impl Default for MousePathOptions {
    fn default() -> Self {
        Self { overshoot_prob: 0.30, micro_pause_prob: 0.05 }
    }
}

impl Default for SecureRng {
    fn default() -> Self {
        Self::new()
    }
}

impl SecureRng {
    pub fn new() -> Self {
        Self { rng: OsRng }
    }

    pub fn uniform_float(&mut self) -> f64 {
        // 53 bits of entropy mapped into [0, 1), matching f64 mantissa width.
        let bits = self.rng.next_u64() >> 11;
        bits as f64 / (1u64 << 53) as f64
    }

    pub fn int_in(&mut self, a: i64, b: i64) -> i64 {
        if a >= b {
            return a;
        }
        a + (self.uniform_float() * (b - a) as f64) as i64
    }

    pub fn float_in(&mut self, a: f64, b: f64) -> f64 {
        a + self.uniform_float() * (b - a)
    }

    pub fn bool(&mut self, p: f64) -> bool {
        self.uniform_float() < p
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let idx = self.int_in(0, items.len() as i64) as usize;
        items.get(idx.min(items.len() - 1))
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        struct Adapter<'a>(&'a mut SecureRng);
        impl rand::RngCore for Adapter<'_> {
            fn next_u32(&mut self) -> u32 {
                self.0.rng.next_u32()
            }
            fn next_u64(&mut self) -> u64 {
                self.0.rng.next_u64()
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                self.0.rng.fill_bytes(dest)
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
                self.0.rng.try_fill_bytes(dest)
            }
        }
        items.shuffle(&mut Adapter(self));
    }

    /// Gaussian via Box–Muller, clamped positive where used by callers.
    pub fn gaussian(&mut self, mean: f64, stddev: f64) -> f64 {
        let u1 = self.uniform_float().max(f64::MIN_POSITIVE);
        let u2 = self.uniform_float();
        let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        mean + z0 * stddev
    }

    pub fn gaussian_positive(&mut self, mean: f64, stddev: f64) -> f64 {
        self.gaussian(mean, stddev).max(0.0)
    }

    /// Gaussian around `base` with `outlier_prob` chance of a long-tail outlier.
    pub fn human_variance(&mut self, base: f64, variance_fraction: f64, outlier_prob: f64) -> f64 {
        if self.bool(outlier_prob) {
            return base * self.float_in(1.5, 3.0);
        }
        self.gaussian_positive(base, base * variance_fraction)
    }

    /// Typing delay per character, in milliseconds.
    pub fn typing_delay(&mut self, base_ms: f64) -> Duration {
        let mut ms = self.gaussian_positive(base_ms, base_ms * 0.4);
        if self.bool(0.05) {
            ms += self.float_in(200.0, 800.0);
        }
        if self.bool(0.15) {
            ms *= self.float_in(1.2, 1.8);
        }
        Duration::from_secs_f64((ms / 1000.0).max(0.0))
    }

    /// Cubic-Bézier mouse path with ease-in-out, per-point jitter, and
    /// optional overshoot-and-correction for movements over 50px.
    pub fn mouse_path(&mut self, start: Point, end: Point, opts: MousePathOptions) -> MousePath {
        let dist = ((end.x - start.x).powi(2) + (end.y - start.y).powi(2)).sqrt();
        let n_points = (8.0 + dist / 40.0).clamp(8.0, 40.0) as usize;

        let overshoot = dist > 50.0 && self.bool(opts.overshoot_prob);
        let target = if overshoot {
            let ox = end.x + self.float_in(-15.0, 15.0);
            let oy = end.y + self.float_in(-15.0, 15.0);
            Point { x: ox, y: oy }
        } else {
            end
        };

        let c1 = Point {
            x: start.x + (target.x - start.x) * self.float_in(0.2, 0.4),
            y: start.y + self.float_in(-30.0, 30.0),
        };
        let c2 = Point {
            x: start.x + (target.x - start.x) * self.float_in(0.6, 0.8),
            y: target.y + self.float_in(-30.0, 30.0),
        };

        let mut points = Vec::with_capacity(n_points + if overshoot { 3 } else { 0 });
        for i in 0..n_points {
            let raw_t = i as f64 / (n_points - 1).max(1) as f64;
            let t = ease_in_out(raw_t);
            let mut p = cubic_bezier(start, c1, c2, target, t);
            p.x += self.gaussian(0.0, 0.6);
            p.y += self.gaussian(0.0, 0.6);
            points.push(p);
        }
        if overshoot {
            for i in 1..=3 {
                let t = i as f64 / 3.0;
                points.push(Point {
                    x: target.x + (end.x - target.x) * t,
                    y: target.y + (end.y - target.y) * t,
                });
            }
        }

        let mut segment_durations = Vec::with_capacity(points.len());
        for _ in 0..points.len() {
            segment_durations.push(Duration::from_millis(self.int_in(4, 16) as u64));
        }
        if self.bool(0.05) && !segment_durations.is_empty() {
            let idx = self.int_in(0, segment_durations.len() as i64) as usize;
            segment_durations[idx] += Duration::from_millis(self.int_in(80, 220) as u64);
        }

        MousePath { points, segment_durations }
    }

    /// Front-loaded decaying-inertia scroll segments summing to `delta`.
    pub fn scroll_path(&mut self, delta: f64) -> Vec<f64> {
        let mut remaining = delta;
        let mut segments = Vec::new();
        let mut factor = 0.4;
        while remaining.abs() > 1.0 && segments.len() < 20 {
            let step = remaining * factor;
            segments.push(step);
            remaining -= step;
            factor = (factor * 0.82).max(0.08);
        }
        if remaining.abs() > 0.5 {
            segments.push(remaining);
        }
        segments
    }

    /// A short opaque token with at least 32 bits of entropy, drawn directly
    /// from the CSPRNG (spec.md §9 open-question resolution: never derive an
    /// identifier from `float.to_string(radix)`).
    pub fn opaque_token(&mut self) -> String {
        let mut bytes = [0u8; 20];
        self.rng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

fn ease_in_out(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

fn cubic_bezier(p0: Point, p1: Point, p2: Point, p3: Point, t: f64) -> Point {
    let u = 1.0 - t;
    let x = u.powi(3) * p0.x + 3.0 * u.powi(2) * t * p1.x + 3.0 * u * t.powi(2) * p2.x + t.powi(3) * p3.x;
    let y = u.powi(3) * p0.y + 3.0 * u.powi(2) * t * p1.y + 3.0 * u * t.powi(2) * p2.y + t.powi(3) * p3.y;
    Point { x, y }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_float_in_range() {
        let mut rng = SecureRng::new();
        for _ in 0..1000 {
            let v = rng.uniform_float();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn int_in_respects_bounds() {
        let mut rng = SecureRng::new();
        for _ in 0..1000 {
            let v = rng.int_in(5, 10);
            assert!((5..10).contains(&v));
        }
    }

    #[test]
    fn gaussian_positive_never_negative() {
        let mut rng = SecureRng::new();
        for _ in 0..1000 {
            assert!(rng.gaussian_positive(1.0, 5.0) >= 0.0);
        }
    }

    #[test]
    fn opaque_token_has_sufficient_entropy() {
        let mut rng = SecureRng::new();
        let a = rng.opaque_token();
        let b = rng.opaque_token();
        assert_ne!(a, b);
        // 20 bytes hex-encoded => 40 chars => 160 bits, well over the 32-bit floor.
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn mouse_path_starts_and_ends_near_target() {
        let mut rng = SecureRng::new();
        let path = rng.mouse_path(
            Point { x: 0.0, y: 0.0 },
            Point { x: 200.0, y: 100.0 },
            MousePathOptions::default(),
        );
        assert!(path.points.len() >= 8);
        let last = path.points.last().unwrap();
        assert!((last.x - 200.0).abs() < 5.0);
        assert!((last.y - 100.0).abs() < 5.0);
    }

    #[test]
    fn scroll_path_sums_to_delta() {
        let mut rng = SecureRng::new();
        let segments = rng.scroll_path(500.0);
        let sum: f64 = segments.iter().sum();
        assert!((sum - 500.0).abs() < 1e-6);
    }
}
