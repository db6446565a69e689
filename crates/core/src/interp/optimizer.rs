//! Operator list optimization.
//!
//! Scanners walk the op array with a small automaton and collapse repeated
//! patterns the consumer can replay much faster as a single operator:
//! runs of tiny inline images become one packed atlas, repeated image and
//! mask paints with translation-only transforms become positioned repeats,
//! and single-glyph text blocks sharing a font are merged. The automaton
//! consumes a mismatching opcode without restarting on it, so overlapping
//! candidates resolve the same way on every pass.

use bytes::Bytes;

use super::opcodes::OpCode;
use super::oplist::{
    AtlasEntry, ImageData, ImageKind, MaskGroupEntry, Operand, Operands,
};

const MIN_IMAGES_IN_INLINE_IMAGES_BLOCK: usize = 10;
const MAX_IMAGES_IN_INLINE_IMAGES_BLOCK: usize = 200;
const MAX_INLINE_ATLAS_WIDTH: usize = 1000;
const IMAGE_PADDING: usize = 1;

const MIN_IMAGES_IN_MASKS_BLOCK: usize = 10;
const MAX_IMAGES_IN_MASKS_BLOCK: usize = 100;
const MAX_SAME_IMAGES_IN_MASKS_BLOCK: usize = 1000;

const MIN_IMAGES_IN_BLOCK: usize = 3;
const MAX_IMAGES_IN_BLOCK: usize = 1000;

const MIN_CHARS_IN_BLOCK: usize = 3;
const MAX_CHARS_IN_BLOCK: usize = 1000;

/// Automaton position: how much of which pattern has been matched.
#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Save,
    SaveTransform,
    InlineImage,
    MaskImage,
    Image,
    BeginText,
    TextFont,
    TextMatrix,
    TextShow,
}

enum Step {
    To(State),
    Fire(Rule),
    Miss,
}

#[derive(Clone, Copy)]
enum Rule {
    InlineImageGroup,
    ImageMaskGroup,
    ImageRepeat,
    TextGroup,
}

fn root(op: OpCode) -> Option<State> {
    match op {
        OpCode::Save => Some(State::Save),
        OpCode::BeginText => Some(State::BeginText),
        _ => None,
    }
}

fn advance(state: State, op: OpCode) -> Step {
    match (state, op) {
        (State::Save, OpCode::Transform) => Step::To(State::SaveTransform),
        (State::SaveTransform, OpCode::PaintInlineImageXObject) => Step::To(State::InlineImage),
        (State::SaveTransform, OpCode::PaintImageMaskXObject) => Step::To(State::MaskImage),
        (State::SaveTransform, OpCode::PaintImageXObject) => Step::To(State::Image),
        (State::InlineImage, OpCode::Restore) => Step::Fire(Rule::InlineImageGroup),
        (State::MaskImage, OpCode::Restore) => Step::Fire(Rule::ImageMaskGroup),
        (State::Image, OpCode::Restore) => Step::Fire(Rule::ImageRepeat),
        (State::BeginText, OpCode::SetFont) => Step::To(State::TextFont),
        (State::TextFont, OpCode::SetTextMatrix) => Step::To(State::TextMatrix),
        (State::TextMatrix, OpCode::ShowText) => Step::To(State::TextShow),
        (State::TextShow, OpCode::EndText) => Step::Fire(Rule::TextGroup),
        _ => Step::Miss,
    }
}

/// Collapse repeated patterns in place.
pub fn optimize(ops: &mut Vec<OpCode>, args: &mut Vec<Operands>) {
    let mut ctx = Context { ops, args, current: 0 };
    let mut state: Option<State> = None;
    let mut i = 0;
    while i < ctx.ops.len() {
        let op = ctx.ops[i];
        let step = match state {
            None => root(op).map_or(Step::Miss, Step::To),
            Some(state) => advance(state, op),
        };
        state = match step {
            Step::To(next) => Some(next),
            Step::Miss => None,
            Step::Fire(rule) => {
                ctx.current = i;
                match rule {
                    Rule::InlineImageGroup => ctx.inline_image_group(),
                    Rule::ImageMaskGroup => ctx.image_mask_group(),
                    Rule::ImageRepeat => ctx.image_repeat(),
                    Rule::TextGroup => ctx.text_group(),
                }
                i = ctx.current;
                None
            }
        };
        i += 1;
    }
}

struct Context<'a> {
    ops: &'a mut Vec<OpCode>,
    args: &'a mut Vec<Operands>,
    /// Index of the last consumed op; handlers move it to steer the scan.
    current: usize,
}

impl Context<'_> {
    /// Length of the element-wise 4-period run starting at `j`, in ops.
    fn period4_end(&self, j: usize) -> usize {
        let mut i = j + 4;
        while i < self.ops.len() && self.ops[i - 4] == self.ops[i] {
            i += 1;
        }
        i - j
    }

    fn transform6(&self, idx: usize) -> [f64; 6] {
        let mut m = [0.0; 6];
        for (k, slot) in m.iter_mut().enumerate() {
            *slot = self.args[idx].get(k).and_then(Operand::as_num).unwrap_or(0.0);
        }
        m
    }

    fn image_at(&self, idx: usize) -> Option<&ImageData> {
        match self.args[idx].first() {
            Some(Operand::Image(img)) => Some(img),
            _ => None,
        }
    }

    fn replace(&mut self, j: usize, howmany: usize, op: OpCode, args: Operands) {
        self.ops.drain(j..j + howmany);
        self.ops.insert(j, op);
        self.args.drain(j..j + howmany);
        self.args.insert(j, args);
    }

    /// (save, transform, paintInlineImageXObject, restore)+ runs pack into
    /// one RGBA atlas painted by `paintInlineImageXObjectGroup`.
    fn inline_image_group(&mut self) {
        let j = self.current - 3;
        let run = self.period4_end(j);
        let count = (run >> 2).min(MAX_IMAGES_IN_INLINE_IMAGES_BLOCK);
        if count < MIN_IMAGES_IN_INLINE_IMAGES_BLOCK {
            self.current = j + run - 1;
            return;
        }

        // Row packing; these images are typically a pixel or two tall.
        let mut map: Vec<AtlasEntry> = Vec::with_capacity(count);
        let mut max_x = 0usize;
        let mut line_height = 0usize;
        let mut cur_x = IMAGE_PADDING;
        let mut cur_y = IMAGE_PADDING;
        for q in 0..count {
            let transform = self.transform6(j + (q << 2) + 1);
            let Some(img) = self.image_at(j + (q << 2) + 2) else {
                self.current = j + count * 4 - 1;
                return;
            };
            if cur_x + img.width > MAX_INLINE_ATLAS_WIDTH {
                max_x = max_x.max(cur_x);
                cur_y += line_height + 2 * IMAGE_PADDING;
                cur_x = 0;
                line_height = 0;
            }
            map.push(AtlasEntry {
                transform,
                x: cur_x,
                y: cur_y,
                w: img.width,
                h: img.height,
            });
            cur_x += img.width + 2 * IMAGE_PADDING;
            line_height = line_height.max(img.height);
        }
        let atlas_w = max_x.max(cur_x) + IMAGE_PADDING;
        let atlas_h = cur_y + line_height + IMAGE_PADDING;
        let mut atlas = vec![0u8; atlas_w * atlas_h * 4];

        for (q, entry) in map.iter().enumerate() {
            let Some(img) = self.image_at(j + (q << 2) + 2) else {
                continue;
            };
            blit_with_padding(&mut atlas, atlas_w, atlas_h, entry, &img.data);
        }

        let group = ImageData {
            width: atlas_w,
            height: atlas_h,
            kind: ImageKind::Rgba32bpp,
            data: Bytes::from(atlas),
            cached: false,
        };
        self.replace(
            j,
            count * 4,
            OpCode::PaintInlineImageXObjectGroup,
            vec![Operand::Image(group), Operand::Placements(map)],
        );
        self.current = j;
    }

    /// (save, transform, paintImageMaskXObject, restore)+ runs become a
    /// positioned repeat when every period paints the same mask with a
    /// translation-only transform, or a mask group otherwise.
    fn image_mask_group(&mut self) {
        let j = self.current - 3;
        let run_end = j + self.period4_end(j);
        let mut count = (run_end - j) >> 2;
        if count < MIN_IMAGES_IN_MASKS_BLOCK {
            self.current = run_end - 1;
            return;
        }

        let first_transform = self.transform6(j + 1);
        let mut is_same_image = false;
        if first_transform[1] == 0.0 && first_transform[2] == 0.0 {
            is_same_image = true;
            let mut i = j + 4;
            for q in 1..count {
                let prev = self.transform6(i - 3);
                let next = self.transform6(i + 1);
                let same_data = match (self.image_at(i - 2), self.image_at(i + 2)) {
                    (Some(a), Some(b)) => a.same_data(b),
                    _ => false,
                };
                if !same_data || prev[..4] != next[..4] {
                    if q < MIN_IMAGES_IN_MASKS_BLOCK {
                        is_same_image = false;
                    } else {
                        count = q;
                    }
                    break;
                }
                i += 4;
            }
        }

        if is_same_image {
            count = count.min(MAX_SAME_IMAGES_IN_MASKS_BLOCK);
            let mut positions = Vec::with_capacity(count * 2);
            for q in 0..count {
                let t = self.transform6(j + (q << 2) + 1);
                positions.push(t[4]);
                positions.push(t[5]);
            }
            let Some(mask) = self.image_at(j + 2).cloned() else {
                self.current = run_end - 1;
                return;
            };
            self.replace(
                j,
                count * 4,
                OpCode::PaintImageMaskXObjectRepeat,
                vec![
                    Operand::Image(mask),
                    Operand::Real(first_transform[0]),
                    Operand::Real(first_transform[3]),
                    Operand::Positions(positions),
                ],
            );
        } else {
            count = count.min(MAX_IMAGES_IN_MASKS_BLOCK);
            let mut masks = Vec::with_capacity(count);
            for q in 0..count {
                let transform = self.transform6(j + (q << 2) + 1);
                let Some(image) = self.image_at(j + (q << 2) + 2).cloned() else {
                    self.current = run_end - 1;
                    return;
                };
                masks.push(MaskGroupEntry { image, transform });
            }
            self.replace(
                j,
                count * 4,
                OpCode::PaintImageMaskXObjectGroup,
                vec![Operand::Masks(masks)],
            );
        }
        self.current = j;
    }

    /// (save, transform, paintImageXObject, restore)+ of the same image
    /// with translation-only transforms becomes a positioned repeat.
    fn image_repeat(&mut self) {
        let j = self.current - 3;
        let first_transform = self.transform6(j + 1);
        if first_transform[1] != 0.0 || first_transform[2] != 0.0 {
            return;
        }

        let mut i = j + 4;
        while i + 3 < self.ops.len() && self.ops[i - 4] == self.ops[i] {
            if self.ops[i - 3] != self.ops[i + 1]
                || self.ops[i - 2] != self.ops[i + 2]
                || self.ops[i - 1] != self.ops[i + 3]
            {
                break;
            }
            if self.args[i - 2].first() != self.args[i + 2].first() {
                break;
            }
            let prev = self.transform6(i - 3);
            let next = self.transform6(i + 1);
            if prev[..4] != next[..4] {
                break;
            }
            i += 4;
        }
        let count = ((i - j) >> 2).min(MAX_IMAGES_IN_BLOCK);
        if count < MIN_IMAGES_IN_BLOCK {
            self.current = i - 1;
            return;
        }

        let mut positions = Vec::with_capacity(count * 2);
        for q in 0..count {
            let t = self.transform6(j + (q << 2) + 1);
            positions.push(t[4]);
            positions.push(t[5]);
        }
        let Some(id) = self.args[j + 2].first().cloned() else {
            self.current = i - 1;
            return;
        };
        self.replace(
            j,
            count * 4,
            OpCode::PaintImageXObjectRepeat,
            vec![
                id,
                Operand::Real(first_transform[0]),
                Operand::Real(first_transform[3]),
                Operand::Positions(positions),
            ],
        );
        self.current = j;
    }

    /// (beginText, setFont, setTextMatrix, showText, endText)+ blocks
    /// sharing a font flatten into one text block of matrix/show pairs.
    fn text_group(&mut self) {
        let mut j = self.current - 4;
        let mut i = j + 5;
        while i < self.ops.len() && self.ops[i - 5] == self.ops[i] {
            if self.ops[i] == OpCode::SetFont
                && (self.args[i - 5].first() != self.args[i].first()
                    || self.args[i - 5].get(1) != self.args[i].get(1))
            {
                break;
            }
            i += 1;
        }
        let mut count = ((i - j) / 5).min(MAX_CHARS_IN_BLOCK);
        if count < MIN_CHARS_IN_BLOCK {
            self.current = i - 1;
            return;
        }
        // The very first block may sit behind dependency markers; absorb
        // one preceding block when its tail matches.
        if j >= 4
            && self.ops[j - 4] == self.ops[j + 1]
            && self.ops[j - 3] == self.ops[j + 2]
            && self.ops[j - 2] == self.ops[j + 3]
            && self.ops[j - 1] == self.ops[j + 4]
            && self.args[j - 4].first() == self.args[j + 1].first()
            && self.args[j - 4].get(1) == self.args[j + 1].get(1)
        {
            count += 1;
            j -= 5;
        }

        let mut write = j + 4;
        let mut read = j + 7;
        for _ in 1..count {
            self.ops[write] = self.ops[read];
            self.args.swap(write, read);
            self.ops[write + 1] = self.ops[read + 1];
            self.args.swap(write + 1, read + 1);
            write += 2;
            read += 5;
        }
        let removed = (count - 1) * 3;
        self.ops.drain(write..write + removed);
        self.args.drain(write..write + removed);
        self.current = write;
    }
}

/// Copy one RGBA image into the atlas and extend its edge pixels one step
/// into the surrounding padding, so bilinear sampling at the seams does
/// not bleed neighbors.
fn blit_with_padding(
    atlas: &mut [u8],
    atlas_w: usize,
    atlas_h: usize,
    entry: &AtlasEntry,
    data: &[u8],
) {
    let row_size = entry.w * 4;
    if data.len() < row_size * entry.h {
        return;
    }
    for row in 0..entry.h {
        let src = &data[row * row_size..(row + 1) * row_size];
        let dst = ((entry.y + row) * atlas_w + entry.x) * 4;
        atlas[dst..dst + row_size].copy_from_slice(src);
    }
    // Top and bottom padding rows replicate the first and last rows.
    if entry.y > 0 {
        let dst = ((entry.y - 1) * atlas_w + entry.x) * 4;
        atlas[dst..dst + row_size].copy_from_slice(&data[..row_size]);
    }
    if entry.y + entry.h < atlas_h {
        let dst = ((entry.y + entry.h) * atlas_w + entry.x) * 4;
        atlas[dst..dst + row_size].copy_from_slice(&data[(entry.h - 1) * row_size..]);
    }
    // Left and right padding columns replicate the edge pixels.
    let y0 = entry.y.saturating_sub(1);
    let y1 = (entry.y + entry.h + 1).min(atlas_h);
    for y in y0..y1 {
        let row = y * atlas_w;
        if entry.x > 0 {
            let src = (row + entry.x) * 4;
            let dst = (row + entry.x - 1) * 4;
            atlas.copy_within(src..src + 4, dst);
        }
        if entry.x + entry.w < atlas_w {
            let src = (row + entry.x + entry.w - 1) * 4;
            let dst = (row + entry.x + entry.w) * 4;
            atlas.copy_within(src..src + 4, dst);
        }
    }
}
