//! Grade label → numeric class ladder

/// Lowest rung (maiden / newcomer races)
pub const CLASS_MAIDEN: u8 = 1;
/// Open class, also the fallback for unrecognised labels
pub const CLASS_OPEN: u8 = 5;
/// Highest rung
pub const CLASS_G1: u8 = 8;

/// Map a published grade label onto the 1..=8 class ladder
///
/// Latin grade marks count only as whole tokens (`G1`, `GIII`, `Jpn2`,
/// `(G2)`, `G1ステークス`); a word that merely contains "GI" is not graded.
/// Japanese condition labels are matched as substrings.
pub fn class_level(grade: &str) -> Option<u8> {
    let g = grade.trim().to_uppercase();
    if g.is_empty() {
        return None;
    }

    let tokens: Vec<&str> = g
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let has = |marks: &[&str]| tokens.iter().any(|t| marks.contains(t));

    let level = if has(&["G3", "GIII", "JPN3", "JPNIII"]) {
        6
    } else if has(&["G2", "GII", "JPN2", "JPNII"]) {
        7
    } else if has(&["G1", "GI", "JPN1", "JPNI"]) {
        CLASS_G1
    } else if has(&["OP", "OPEN", "L", "LISTED"]) || g.contains("オープン") {
        CLASS_OPEN
    } else if g.contains("3勝") || g.contains("1600万") {
        4
    } else if g.contains("2勝") || g.contains("1000万") {
        3
    } else if g.contains("1勝") || g.contains("500万") {
        2
    } else if has(&["MAIDEN"]) || g.contains("未勝利") || g.contains("新馬") {
        CLASS_MAIDEN
    } else {
        CLASS_OPEN
    };
    Some(level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graded_labels() {
        assert_eq!(class_level("G1"), Some(8));
        assert_eq!(class_level("GIII"), Some(6));
        assert_eq!(class_level("GII"), Some(7));
        assert_eq!(class_level("Jpn1"), Some(8));
    }

    #[test]
    fn test_conditions_labels() {
        assert_eq!(class_level("3勝クラス"), Some(4));
        assert_eq!(class_level("1勝クラス"), Some(2));
        assert_eq!(class_level("2歳未勝利"), Some(CLASS_MAIDEN));
        assert_eq!(class_level("Maiden"), Some(CLASS_MAIDEN));
    }

    #[test]
    fn test_unknown_falls_back_to_open() {
        assert_eq!(class_level("Handicap"), Some(CLASS_OPEN));
        assert_eq!(class_level("  "), None);
    }

    #[test]
    fn test_grade_marks_match_whole_tokens() {
        assert_eq!(class_level("REGIONAL HANDICAP"), Some(CLASS_OPEN));
        assert_eq!(class_level("Origin Stakes"), Some(CLASS_OPEN));
        assert_eq!(class_level("Tenno Sho (G1)"), Some(CLASS_G1));
        assert_eq!(class_level("G2ステークス"), Some(7));
        assert_eq!(class_level("Listed"), Some(CLASS_OPEN));
        assert_eq!(class_level("Maidenhead Cup"), Some(CLASS_OPEN));
    }
}
