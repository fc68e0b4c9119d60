//! Property tests for the buffer ownership cycle and frame rendering.
//!
//! 1. Random interleavings of acquire/draw/submit/release/discard never
//!    free a buffer twice and never allow drawing after submission.
//! 2. Pool counters always add up to the number of live buffers.
//! 3. Rendered text never inks the right padding, whatever the line.

use proptest::prelude::*;
use wtw_core::{ColorScheme, Rgba, Sides, Size};
use wtw_render::{
    BufferId, BufferPool, BufferState, Canvas, Draw, PoolError, RenderOptions, Renderer,
};
use wtw_text::FixedFont;

#[derive(Debug, Clone)]
enum Op {
    Acquire(u32, u32),
    Draw(usize),
    Submit(usize),
    Release(usize),
    Discard(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..32, 1u32..32).prop_map(|(w, h)| Op::Acquire(w, h)),
        (0usize..16).prop_map(Op::Draw),
        (0usize..16).prop_map(Op::Submit),
        (0usize..16).prop_map(Op::Release),
        (0usize..16).prop_map(Op::Discard),
    ]
}

/// Expected state per issued id: `Some(state)` while live, `None` once freed.
fn pick(model: &[Option<BufferState>], n: usize) -> Option<BufferId> {
    if model.is_empty() {
        None
    } else {
        Some(BufferId::from_raw((n % model.len()) as u64))
    }
}

proptest! {
    #[test]
    fn ownership_cycle_is_enforced(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut pool = BufferPool::new();
        let mut model: Vec<Option<BufferState>> = Vec::new();
        let mut frees: Vec<u32> = Vec::new();

        for op in ops {
            match op {
                Op::Acquire(w, h) => {
                    let id = pool.acquire(Size::new(w, h)).unwrap();
                    prop_assert_eq!(id.get() as usize, model.len());
                    model.push(Some(BufferState::Owned));
                    frees.push(0);
                }
                Op::Draw(n) => {
                    let Some(id) = pick(&model, n) else { continue };
                    let idx = id.get() as usize;
                    match (model[idx], pool.canvas(id)) {
                        (Some(BufferState::Owned), Ok(mut canvas)) => {
                            let bounds = canvas.bounds();
                            canvas.fill_rect(bounds, Rgba::WHITE);
                        }
                        (Some(BufferState::Submitted), Err(PoolError::AlreadySubmitted(_))) => {}
                        (None, Err(PoolError::Unknown(_))) => {}
                        (state, other) => prop_assert!(false, "draw on {:?} gave {:?}", state, other.map(|_| ())),
                    }
                }
                Op::Submit(n) => {
                    let Some(id) = pick(&model, n) else { continue };
                    let idx = id.get() as usize;
                    let result = pool.submit(id).map(|s| s.id);
                    match (model[idx], result) {
                        (Some(BufferState::Owned), Ok(got)) => {
                            prop_assert_eq!(got, id);
                            model[idx] = Some(BufferState::Submitted);
                        }
                        (Some(BufferState::Submitted), Err(PoolError::AlreadySubmitted(_))) => {}
                        (None, Err(PoolError::Unknown(_))) => {}
                        (state, other) => prop_assert!(false, "submit on {:?} gave {:?}", state, other),
                    }
                }
                Op::Release(n) => {
                    let Some(id) = pick(&model, n) else { continue };
                    let idx = id.get() as usize;
                    match (model[idx], pool.release(id)) {
                        (Some(BufferState::Submitted), Ok(true)) => {
                            model[idx] = None;
                            frees[idx] += 1;
                        }
                        (Some(BufferState::Owned), Err(PoolError::NotSubmitted(_))) => {}
                        (None, Ok(false)) => {}
                        (state, other) => prop_assert!(false, "release on {:?} gave {:?}", state, other),
                    }
                }
                Op::Discard(n) => {
                    let Some(id) = pick(&model, n) else { continue };
                    let idx = id.get() as usize;
                    match (model[idx], pool.discard(id)) {
                        (Some(BufferState::Owned), Ok(true)) => {
                            model[idx] = None;
                            frees[idx] += 1;
                        }
                        (Some(BufferState::Submitted), Err(PoolError::AlreadySubmitted(_))) => {}
                        (None, Ok(false)) => {}
                        (state, other) => prop_assert!(false, "discard on {:?} gave {:?}", state, other),
                    }
                }
            }

            for (raw, expected) in model.iter().enumerate() {
                prop_assert_eq!(pool.state(BufferId::from_raw(raw as u64)), *expected);
            }
            prop_assert!(frees.iter().all(|&f| f <= 1));

            let stats = pool.stats();
            prop_assert_eq!(
                stats.allocated - stats.released - stats.discarded,
                pool.len() as u64
            );
        }
    }

    #[test]
    fn text_stays_out_of_right_padding(
        line in "[a-z ]{0,40}",
        width in 20u32..160,
        pad in 0u32..8,
        x in 0i32..20,
    ) {
        let font = FixedFont::new(7, 14);
        let height = 14 + 2 * pad;
        let mut pixels = vec![0u32; (width * height) as usize];
        let mut canvas = Canvas::new(&mut pixels, width, height, width as usize).unwrap();
        let options = RenderOptions {
            x,
            y: 0,
            padding: Sides::all(pad),
            colors: ColorScheme::new(Rgba::WHITE, Rgba::BLACK),
            outline: false,
        };
        Renderer::new().render(&mut canvas, [line.as_bytes()], &font, &options);

        let limit = (i64::from(width) - i64::from(pad)).max(0) as u32;
        let ink = Rgba::WHITE.to_premultiplied_argb();
        for row in 0..height {
            for col in limit..width {
                prop_assert_ne!(pixels[(row * width + col) as usize], ink, "ink at ({}, {})", col, row);
            }
        }
    }
}
