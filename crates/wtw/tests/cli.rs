//! End-to-end tests that run the `wtw` binary against the headless display.
//!
//! Children are small `sh -c` scripts; frames are checked through the PPM
//! dump and restarts through a file each run appends to.

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use pretty_assertions::assert_eq;

fn wtw() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_wtw"));
    cmd.env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with("WTW_") {
            cmd.env_remove(key);
        }
    }
    cmd.env("WTW_BACKEND", "headless");
    cmd
}

/// Parsed binary PPM.
struct Ppm {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

impl Ppm {
    fn read(path: &Path) -> Self {
        let bytes = fs::read(path).expect("read dump");
        let mut fields = Vec::new();
        let mut pos = 0;
        while fields.len() < 4 {
            while bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            let start = pos;
            while !bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            fields.push(String::from_utf8_lossy(&bytes[start..pos]).into_owned());
        }
        assert_eq!(fields[0], "P6");
        assert_eq!(fields[3], "255");
        let width = fields[1].parse().expect("width");
        let height = fields[2].parse().expect("height");
        let rgb = bytes[pos + 1..].to_vec();
        assert_eq!(rgb.len(), (width * height * 3) as usize);
        Self { width, height, rgb }
    }

    fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * self.width + x) * 3) as usize;
        [self.rgb[i], self.rgb[i + 1], self.rgb[i + 2]]
    }

    /// `(x, y, w, h)` of every non-black pixel.
    fn painted_bounds(&self) -> Option<(u32, u32, u32, u32)> {
        let mut found: Option<(u32, u32, u32, u32)> = None;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.pixel(x, y) == [0, 0, 0] {
                    continue;
                }
                found = Some(match found {
                    None => (x, y, x, y),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                });
            }
        }
        found.map(|(x0, y0, x1, y1)| (x0, y0, x1 - x0 + 1, y1 - y0 + 1))
    }
}

fn runs_logged(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

fn run_with_deadline(cmd: &mut Command, deadline: Duration) -> Output {
    let mut child = cmd.spawn().expect("spawn wtw");
    let start = Instant::now();
    loop {
        if child.try_wait().expect("try_wait").is_some() {
            return child.wait_with_output().expect("collect output");
        }
        if start.elapsed() > deadline {
            let _ = child.kill();
            let out = child.wait_with_output().expect("collect output");
            panic!(
                "wtw did not exit within {deadline:?}; stderr:\n{}",
                String::from_utf8_lossy(&out.stderr)
            );
        }
        thread::sleep(Duration::from_millis(20));
    }
}

// ── Usage ──────────────────────────────────────────────────────────────

#[test]
fn missing_command_exits_with_usage_status() {
    let out = wtw().arg("-p").arg("3").output().expect("run wtw");
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage"));
}

#[test]
fn bad_color_exits_with_usage_status() {
    let out = wtw().args(["-b", "zzz", "true"]).output().expect("run wtw");
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn missing_font_file_fails_setup() {
    let out = wtw()
        .args(["-f", "/nonexistent/wtw-test/font.ttf", "--output", "64x64", "true"])
        .output()
        .expect("run wtw");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("wtw: "));
}

#[cfg(feature = "wayland")]
#[test]
fn unreachable_compositor_fails_setup() {
    let dir = tempfile::tempdir().unwrap();
    let out = wtw()
        .env("WTW_BACKEND", "wayland")
        .env("XDG_RUNTIME_DIR", dir.path())
        .env("WAYLAND_DISPLAY", "wtw-test-nonexistent")
        .env_remove("WAYLAND_SOCKET")
        .args(["--fixed-font", "8x16", "true"])
        .output()
        .expect("run wtw");
    assert_eq!(out.status.code(), Some(1));
    assert!(
        String::from_utf8_lossy(&out.stderr).contains("cannot connect to display"),
        "{}",
        String::from_utf8_lossy(&out.stderr)
    );
}

// ── Frames ─────────────────────────────────────────────────────────────

#[test]
fn each_frame_replaces_the_previous_one() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("frame.ppm");
    let script = "printf 'hello\\n\\004\\n'; sleep 0.2; printf 'world\\nfoo\\n\\004\\n'; sleep 3";

    let out = run_with_deadline(
        wtw()
            .args(["--fixed-font", "8x16", "--output", "200x100", "--frames", "2"])
            .args(["-b", "202020", "-c", "ffffff", "-p", "0", "--dump"])
            .arg(&dump)
            .args(["sh", "-c", script]),
        Duration::from_secs(10),
    );
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));

    let ppm = Ppm::read(&dump);
    assert_eq!((ppm.width, ppm.height), (200, 100));
    // Two lines, five cells wide: the one-line first frame is gone.
    assert_eq!(ppm.painted_bounds(), Some((0, 0, 40, 32)));
    assert_eq!(ppm.pixel(39, 31), [0x20, 0x20, 0x20]);
    assert_eq!(ppm.pixel(40, 0), [0, 0, 0]);
}

#[test]
fn position_and_padding_move_the_block() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("frame.ppm");

    let out = run_with_deadline(
        wtw()
            .args(["--fixed-font", "8x16", "--output", "120x80", "--frames", "1"])
            .args(["-b", "404040", "-x", "10", "-y", "5", "-P", "2", "-p", "0", "--dump"])
            .arg(&dump)
            .args(["sh", "-c", "printf 'ab\\n\\004\\n'; sleep 3"]),
        Duration::from_secs(10),
    );
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));

    let ppm = Ppm::read(&dump);
    assert_eq!(ppm.painted_bounds(), Some((10, 5, 16 + 4, 16 + 4)));
}

#[test]
fn explicit_surface_size_wins_over_output() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("frame.ppm");

    let out = run_with_deadline(
        wtw()
            .args(["--fixed-font", "8x16", "--output", "300x200", "--frames", "1"])
            .args(["-w", "64", "-h", "48", "-p", "0", "--dump"])
            .arg(&dump)
            .args(["sh", "-c", "printf 'x\\n\\004\\n'; sleep 3"]),
        Duration::from_secs(10),
    );
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));

    let ppm = Ppm::read(&dump);
    assert_eq!((ppm.width, ppm.height), (64, 48));
}

#[test]
fn long_line_is_cut_with_an_ellipsis_inside_the_padding() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("frame.ppm");
    let script = format!("printf '{}\\n\\004\\n'; sleep 3", "a".repeat(30));

    let out = run_with_deadline(
        wtw()
            .args(["--fixed-font", "8x16", "--output", "100x40", "--frames", "1"])
            .args(["-b", "202020", "-c", "ffffff", "-P", "4", "-p", "0", "--dump"])
            .arg(&dump)
            .args(["sh", "-c", &script]),
        Duration::from_secs(10),
    );
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));

    let ppm = Ppm::read(&dump);
    let white = [0xFF, 0xFF, 0xFF];
    let bg = [0x20, 0x20, 0x20];
    // The block spans the surface; one 16px line plus padding.
    assert_eq!(ppm.painted_bounds(), Some((0, 0, 100, 24)));
    // Budget 100 - 2*4 = 92: ten cells, then the ellipsis cell at 4 + 80.
    let cells: Vec<u32> = (0..100).filter(|&x| ppm.pixel(x, 4) == white).collect();
    assert_eq!(cells.len(), 11 * 7);
    assert_eq!(ppm.pixel(83, 4), bg);
    assert_eq!(ppm.pixel(84, 4), white);
    assert_eq!(ppm.pixel(90, 15), white);
    // Nothing is drawn past the ellipsis, right padding included.
    for y in 0..24 {
        for x in 91..100 {
            assert_eq!(ppm.pixel(x, y), bg, "ink at ({x},{y})");
        }
    }
}

// ── Restarts ───────────────────────────────────────────────────────────

#[test]
fn crash_loop_restarts_once_per_period() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("runs");
    let script = format!(
        "echo run >> '{}'; printf 'x\\n\\004\\n'; exit 1",
        log.display()
    );

    let start = Instant::now();
    let out = run_with_deadline(
        wtw()
            .args(["--fixed-font", "8x16", "--output", "64x64", "--frames", "3", "-p", "1"])
            .args(["sh", "-c", &script]),
        Duration::from_secs(15),
    );
    let elapsed = start.elapsed();

    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(runs_logged(&log), 3);
    // Two waits of a full period between the three runs.
    assert!(elapsed >= Duration::from_secs(2), "finished after {elapsed:?}");
}

#[test]
fn negative_period_restarts_without_waiting() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("runs");
    let script = format!("echo run >> '{}'; printf 'x\\n\\004\\n'", log.display());

    let start = Instant::now();
    let out = run_with_deadline(
        wtw()
            .args(["--fixed-font", "8x16", "--output", "64x64", "--frames", "3", "-p", "-1"])
            .args(["sh", "-c", &script]),
        Duration::from_secs(15),
    );

    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(runs_logged(&log) >= 3);
    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
}

#[test]
fn zero_period_runs_once_and_sigterm_stops_the_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("runs");
    let script = format!("echo run >> '{}'; printf 'once\\n\\004\\n'", log.display());

    let child = wtw()
        .args(["--fixed-font", "8x16", "--output", "64x64", "-p", "0"])
        .args(["sh", "-c", &script])
        .spawn()
        .expect("spawn wtw");
    let pid = Pid::from_raw(i32::try_from(child.id()).unwrap());

    thread::sleep(Duration::from_millis(1500));
    assert_eq!(runs_logged(&log), 1);
    kill(pid, Signal::SIGTERM).unwrap();

    let out = child.wait_with_output().expect("collect output");
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("terminated"));
    assert_eq!(runs_logged(&log), 1);
}

#[test]
fn environment_supplies_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("frame.ppm");

    let out = run_with_deadline(
        wtw()
            .env("WTW_FIXED_FONT", "8x16")
            .env("WTW_OUTPUT", "50x40")
            .env("WTW_FRAMES", "1")
            .env("WTW_PERIOD", "0")
            .env("WTW_BACKGROUND", "ff0000")
            .env("WTW_DUMP", &dump)
            .args(["sh", "-c", "printf 'a\\n\\004\\n'; sleep 3"]),
        Duration::from_secs(10),
    );
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));

    let ppm = Ppm::read(&dump);
    assert_eq!((ppm.width, ppm.height), (50, 40));
    // Below the glyph box, inside the block.
    assert_eq!(ppm.pixel(7, 15), [0xFF, 0, 0]);
}
