//! Embedding provider clients and vector serialization.

pub mod openai;

use std::fmt::Write as _;

/// Renders a vector as the bracketed, fixed-precision literal stored in
/// Postgres (`[0.012345,-0.678901,...]`), cast server-side via `::vector`.
pub fn vector_literal(values: &[f32]) -> String {
    let mut out = String::with_capacity(values.len() * 10 + 2);
    out.push('[');
    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        let _ = write!(out, "{value:.6}");
    }
    out.push(']');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_uses_fixed_precision() {
        assert_eq!(vector_literal(&[]), "[]");
        assert_eq!(vector_literal(&[0.5]), "[0.500000]");
        assert_eq!(
            vector_literal(&[0.123_456_79, -1.0, 2.0]),
            "[0.123457,-1.000000,2.000000]"
        );
    }
}
