/// Lower-case, trim and collapse internal whitespace runs to one space.
pub fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Levenshtein edit distance over Unicode scalar values.
///
/// Classic dynamic-programming matrix: rows = len(b) + 1, columns = len(a) + 1,
/// first row and column seeded with their index.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut matrix = vec![vec![0usize; a.len() + 1]; b.len() + 1];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, cell) in matrix[0].iter_mut().enumerate() {
        *cell = j;
    }

    for i in 1..=b.len() {
        for j in 1..=a.len() {
            let cost = if b[i - 1] == a[j - 1] { 0 } else { 1 };
            let substitution = matrix[i - 1][j - 1] + cost;
            let insertion = matrix[i][j - 1] + 1;
            let deletion = matrix[i - 1][j] + 1;
            matrix[i][j] = substitution.min(insertion).min(deletion);
        }
    }

    matrix[b.len()][a.len()]
}

/// Similarity of two strings as an integer percentage in `0..=100`.
///
/// Both inputs are normalized first; identical normalized strings (including
/// two empty ones) score exactly 100.
pub fn similarity(a: &str, b: &str) -> u8 {
    let a = normalize(a);
    let b = normalize(b);

    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 100;
    }

    let distance = levenshtein(&a, &b);
    let score = (100.0 * (max_len - distance) as f64 / max_len as f64).round();
    score.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
        assert_eq!(levenshtein("são", "sao"), 1);
    }

    #[test]
    fn normalization_ignores_case_and_spacing() {
        assert_eq!(normalize("  Acme   Comércio\tLtda "), "acme comércio ltda");
        assert_eq!(similarity("ACME  Ltda", "acme ltda"), 100);
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(similarity("", ""), 100);
        assert_eq!(similarity("   ", ""), 100);
        assert_eq!(similarity("abc", ""), 0);
    }

    #[test]
    fn partial_matches_round_to_nearest() {
        // kitten/sitting: (7 - 3) / 7 = 57.14
        assert_eq!(similarity("kitten", "sitting"), 57);
        // one typo in ten characters
        assert_eq!(similarity("Maria Lima", "Maria Lma"), 90);
        assert_eq!(similarity("João Silva", "Joao Silva"), 90);
    }
}
