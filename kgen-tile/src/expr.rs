//! Builders for arithmetic expressions used inside generated kernels.
//!
//! These functions return statement text instead of emitting it, so callers
//! can queue the result in a [`StatementBatch`](kgen_emit::StatementBatch) or
//! splice it into a larger statement.

const SWIZZLE_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Swizzle selecting `chunk_len` components of a `vec_len`-wide vector from
/// `offset`. Selecting the whole vector needs no swizzle.
pub fn vec_chunk(vec_len: usize, chunk_len: usize, offset: usize) -> String {
    if chunk_len == vec_len {
        return String::new();
    }
    let mut s = String::with_capacity(chunk_len + 2);
    s.push_str(".s");
    for &d in &SWIZZLE_DIGITS[offset..offset + chunk_len] {
        s.push(d as char);
    }
    s
}

/// How multiply-accumulate statements are spelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MulCore {
    /// `c += a * b`
    #[default]
    MulAdd,
    /// `c = mad(a, b, c)`
    Mad,
    /// `c += dot(a, b)`, real vectors only.
    Dot,
}

/// Swap the real and imaginary parts of `vec_len` complex values.
///
/// `x` becomes `x.s10`; an existing swizzle such as `x.s4567` becomes
/// `x.s5476`.
pub fn swap_complex_components(src: &str, vec_len: usize) -> String {
    match src.rfind(".s") {
        Some(pos) => {
            let (base, swizzle) = src.split_at(pos + 2);
            let mut out = String::with_capacity(src.len());
            out.push_str(base);
            let digits = swizzle.as_bytes();
            for pair in digits.chunks(2) {
                if let [lo, hi] = pair {
                    out.push(*hi as char);
                    out.push(*lo as char);
                } else {
                    out.push(pair[0] as char);
                }
            }
            out
        }
        None => {
            let mut out = format!("{src}.s");
            for i in 0..vec_len.max(1) {
                out.push(SWIZZLE_DIGITS[2 * i + 1] as char);
                out.push(SWIZZLE_DIGITS[2 * i] as char);
            }
            out
        }
    }
}

/// Real and imaginary parts of a single complex value.
pub fn take_complex_apart(src: &str) -> (String, String) {
    if src.rfind(".s").is_some_and(|pos| src.len() - pos >= 4) {
        let re = src[..src.len() - 1].to_string();
        let mut im = src[..src.len() - 2].to_string();
        im.push_str(&src[src.len() - 1..]);
        (re, im)
    } else {
        (format!("{src}.s0"), format!("{src}.s1"))
    }
}

/// Complex multiply-accumulate of single complex elements.
///
/// Produces `dst = a * b + c` with optional conjugation of either factor.
/// `c` equal to `dst` turns the assignment into `+=`; `None` drops the
/// addend.
#[allow(clippy::too_many_arguments)]
pub fn complex_mul_update(
    dst: &str,
    a: &str,
    b: &str,
    c: Option<&str>,
    is_double: bool,
    conj_a: bool,
    conj_b: bool,
    core: MulCore,
) -> String {
    let base = if is_double { "double2" } else { "float2" };
    let (first, second) = if conj_b { (a, b) } else { (b, a) };
    let swapped = swap_complex_components(first, 1);
    let (re, im) = take_complex_apart(second);

    let (src11, src12, src21, src22, sign1, sign2, sign3) = if conj_a && conj_b {
        (swapped, first.to_string(), im, re, "-", "", "-")
    } else if conj_a || conj_b {
        (first.to_string(), swapped, re, im, "", "", "-")
    } else {
        (first.to_string(), swapped, re, im, "", "-", "")
    };

    match core {
        MulCore::Mad => {
            let mut s = match c {
                Some(c) => format!("{dst} = mad({src11}, ({base})({sign1}{src21}), {c});\n"),
                None => format!("{dst} = {src11} * {sign1}{src21};\n"),
            };
            s.push_str(&format!(
                "{dst} = mad({src12}, ({base})({sign2}{src22}, {sign3}{src22}), {dst});\n"
            ));
            s
        }
        MulCore::MulAdd | MulCore::Dot => {
            let op = if c == Some(dst) { "+=" } else { "=" };
            let mut s = format!(
                "{dst} {op} {src11} * {sign1}{src21} + {src12} * ({base})({sign2}{src22}, {sign3}{src22})"
            );
            if let Some(c) = c.filter(|c| *c != dst) {
                s.push_str(" + ");
                s.push_str(c);
            }
            s.push_str(";\n");
            s
        }
    }
}

/// Real multiply-accumulate `c += a * b`.
///
/// `swap` emits the factors as `a * b` instead of `b * a`, keeping the
/// operand order aligned with a transposed result tile.
pub fn real_mul_update(c: &str, a: &str, b: &str, swap: bool, core: MulCore) -> String {
    let (src1, src2) = if swap { (a, b) } else { (b, a) };
    match core {
        MulCore::Mad => format!("{c} = mad({src1}, {src2}, {c});\n"),
        MulCore::Dot => format!("{c} += dot({src1}, {src2});\n"),
        MulCore::MulAdd => format!("{c} += {src1} * {src2};\n"),
    }
}

fn parse_uint(s: &str) -> Option<u64> {
    let s = s.trim();
    let s = s.strip_suffix('u').unwrap_or(s);
    s.parse().ok()
}

fn uint_literal(s: &str) -> String {
    match parse_uint(s) {
        Some(v) => format!("{v}u"),
        None if s.is_empty() => "0u".to_string(),
        None => s.to_string(),
    }
}

fn plus(expr: String, third: &str) -> String {
    match parse_uint(third) {
        Some(0) => expr,
        None if third.is_empty() => expr,
        _ => format!("{expr} + {third}"),
    }
}

/// Integer expression for `first * second / scale + third`, folding
/// constants and replacing power-of-two factors with shifts.
///
/// `scale` divides `second`; an empty `third` means no addend.
pub fn fast_scalar_mad(first: &str, second: &str, scale: u64, third: &str) -> String {
    let scale = scale.max(1);
    let u1 = parse_uint(first);
    let u2 = parse_uint(second);
    let u3 = parse_uint(third);
    let zero_third = || {
        if third.is_empty() {
            "0".to_string()
        } else {
            third.to_string()
        }
    };

    if u1 == Some(0) || u2.is_some_and(|v| v / scale == 0) {
        return zero_third();
    }

    match (u1, u2) {
        (Some(v1), Some(v2)) => {
            let v = v1 * v2 / scale;
            match u3 {
                Some(v3) => (v + v3).to_string(),
                None if third.is_empty() => v.to_string(),
                None => format!("{v} + {third}"),
            }
        }
        (Some(v1), None) if v1.is_power_of_two() && scale.is_power_of_two() => {
            let shift = v1.trailing_zeros() as i64 - scale.trailing_zeros() as i64;
            let scaled = match shift {
                0 => second.to_string(),
                s if s > 0 => format!("({second} << {s})"),
                s => format!("({second} >> {})", -s),
            };
            plus(scaled, third)
        }
        (Some(v1), None) if scale == 1 => {
            format!("mad24({v1}u, {second}, {})", uint_literal(third))
        }
        (None, Some(v2)) => {
            let v = v2 / scale;
            if v == 1 {
                plus(first.to_string(), third)
            } else {
                format!("mad24({first}, {v}u, {})", uint_literal(third))
            }
        }
        _ => {
            let scaled = if scale == 1 {
                second.to_string()
            } else if scale.is_power_of_two() {
                format!("({second} >> {})", scale.trailing_zeros())
            } else {
                format!("({second} / {scale})")
            };
            format!("mad24({}, {scaled}, {})", uint_literal(first), uint_literal(third))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_chunk() {
        assert_eq!(vec_chunk(4, 4, 0), "");
        assert_eq!(vec_chunk(4, 2, 2), ".s23");
        assert_eq!(vec_chunk(16, 3, 12), ".scde");
    }

    #[test]
    fn test_swap_components() {
        assert_eq!(swap_complex_components("b", 1), "b.s10");
        assert_eq!(swap_complex_components("b", 2), "b.s1032");
        assert_eq!(swap_complex_components("a[1].s45", 1), "a[1].s54");
        assert_eq!(swap_complex_components("a[1].s4567", 2), "a[1].s5476");
    }

    #[test]
    fn test_take_apart() {
        assert_eq!(
            take_complex_apart("alpha"),
            ("alpha.s0".to_string(), "alpha.s1".to_string())
        );
        assert_eq!(
            take_complex_apart("a0.s67"),
            ("a0.s6".to_string(), "a0.s7".to_string())
        );
    }

    #[test]
    fn test_complex_mul_plain() {
        let s = complex_mul_update("c", "a", "b", Some("c"), false, false, false, MulCore::MulAdd);
        assert_eq!(s, "c += b * a.s0 + b.s10 * (float2)(-a.s1, a.s1);\n");
    }

    #[test]
    fn test_complex_mul_conj_both() {
        let s = complex_mul_update("r", "a", "b", None, true, true, true, MulCore::MulAdd);
        assert_eq!(s, "r = a.s10 * -b.s1 + a * (double2)(b.s0, -b.s0);\n");
    }

    #[test]
    fn test_complex_mul_mad() {
        let s = complex_mul_update("c", "a", "b", Some("t"), false, true, false, MulCore::Mad);
        assert_eq!(
            s,
            "c = mad(b, (float2)(a.s0), t);\nc = mad(b.s10, (float2)(a.s1, -a.s1), c);\n"
        );
    }

    #[test]
    fn test_real_mul() {
        assert_eq!(real_mul_update("c", "a", "b", false, MulCore::MulAdd), "c += b * a;\n");
        assert_eq!(real_mul_update("c", "a", "b", true, MulCore::Mad), "c = mad(a, b, c);\n");
        assert_eq!(real_mul_update("c", "a", "b", true, MulCore::Dot), "c += dot(a, b);\n");
    }

    #[test]
    fn test_fast_mad_folding() {
        assert_eq!(fast_scalar_mad("0", "k", 1, "x"), "x");
        assert_eq!(fast_scalar_mad("0", "k", 1, ""), "0");
        assert_eq!(fast_scalar_mad("4", "8", 2, "3"), "19");
        assert_eq!(fast_scalar_mad("4", "8", 2, "off"), "16 + off");
        assert_eq!(fast_scalar_mad("lid", "2", 4, "off"), "off");
    }

    #[test]
    fn test_fast_mad_shifts() {
        assert_eq!(fast_scalar_mad("8", "lda", 1, ""), "(lda << 3)");
        assert_eq!(fast_scalar_mad("2", "lda", 8, "k"), "(lda >> 2) + k");
        assert_eq!(fast_scalar_mad("4", "lda", 4, "0"), "lda");
    }

    #[test]
    fn test_fast_mad_mad24() {
        assert_eq!(fast_scalar_mad("3", "lda", 1, "k"), "mad24(3u, lda, k)");
        assert_eq!(fast_scalar_mad("gid", "12", 4, "5"), "mad24(gid, 3u, 5u)");
        assert_eq!(fast_scalar_mad("gid", "4", 4, "k"), "gid + k");
        assert_eq!(fast_scalar_mad("gid", "lda", 4, ""), "mad24(gid, (lda >> 2), 0u)");
        assert_eq!(fast_scalar_mad("gid", "lda", 3, "k"), "mad24(gid, (lda / 3), k)");
    }
}
