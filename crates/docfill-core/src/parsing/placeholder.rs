/// Shortest underscore run that marks a text unit as a blank to fill.
///
/// Existing plant documents rely on this exact threshold.
pub const MIN_PLACEHOLDER_RUN: usize = 3;

/// Run lengths consumed per substitution, longest first.
const CHUNKS: [usize; 3] = [5, 4, 3];

/// Whether `text` contains a run of at least [`MIN_PLACEHOLDER_RUN`] underscores.
pub fn has_placeholder(text: &str) -> bool {
    let mut run = 0;
    for ch in text.chars() {
        if ch == '_' {
            run += 1;
            if run >= MIN_PLACEHOLDER_RUN {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Replace every underscore run in `text` with `value`.
///
/// Runs are consumed left to right in chunks of 5, 4 or 3 underscores
/// (longest that fits), each chunk becoming one copy of `value`. A leftover
/// of one or two underscores stays literal. The inserted value is never
/// re-scanned, so values containing underscores are written verbatim.
pub fn substitute(text: &str, value: &str) -> String {
    let mut out = String::with_capacity(text.len() + value.len());
    let mut run = 0;
    for ch in text.chars() {
        if ch == '_' {
            run += 1;
            continue;
        }
        flush_run(&mut out, run, value);
        run = 0;
        out.push(ch);
    }
    flush_run(&mut out, run, value);
    out
}

fn flush_run(out: &mut String, mut run: usize, value: &str) {
    while run >= MIN_PLACEHOLDER_RUN {
        let chunk = CHUNKS
            .iter()
            .copied()
            .find(|&c| c <= run)
            .unwrap_or(MIN_PLACEHOLDER_RUN);
        out.push_str(value);
        run -= chunk;
    }
    out.extend(std::iter::repeat('_').take(run));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundary() {
        assert!(!has_placeholder("a__b"));
        assert!(!has_placeholder("__ x __"));
        assert!(has_placeholder("___"));
        assert!(has_placeholder("Lote: ___"));
        assert!(!has_placeholder(""));
    }

    #[test]
    fn substitutes_common_variants() {
        assert_eq!(substitute("Lote: ___", "L-7"), "Lote: L-7");
        assert_eq!(substitute("Nome: ____", "João"), "Nome: João");
        assert_eq!(substitute("Data: _____ fim", "01/02"), "Data: 01/02 fim");
    }

    #[test]
    fn long_runs_split_longest_first() {
        assert_eq!(substitute("______", "x"), "x_");
        assert_eq!(substitute("_______", "x"), "x__");
        assert_eq!(substitute("________", "x"), "xx");
        assert_eq!(substitute("__________", "x"), "xx");
    }

    #[test]
    fn short_runs_are_kept() {
        assert_eq!(substitute("snake_case __ ok", "x"), "snake_case __ ok");
    }

    #[test]
    fn multiple_runs_each_replaced() {
        assert_eq!(
            substitute("De ___ até ____.", "X"),
            "De X até X."
        );
    }

    #[test]
    fn value_with_underscores_is_not_rescanned() {
        assert_eq!(substitute("Código: ___", "A___B"), "Código: A___B");
    }
}
