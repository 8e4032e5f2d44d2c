/// Calculates the 1-based line and column number for a given byte position in the source text.
/// Positions past the end of the text clamp to the last position.
pub fn get_line_and_column(source: &str, position: usize) -> (usize, usize) {
    let mut line = 1;
    let mut column = 1;
    for (i, c) in source.char_indices() {
        if i >= position {
            break;
        }
        if c == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// 1-based first and last line covered by the byte range `start..end`.
pub fn line_range(source: &str, start: usize, end: usize) -> (usize, usize) {
    let (first, _) = get_line_and_column(source, start);
    let last_byte = if end > start { end - 1 } else { start };
    let (last, _) = get_line_and_column(source, last_byte);
    (first, last)
}

/// Length of the longest run of `ch` in `text`.
pub fn longest_run(text: &str, ch: char) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == ch {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_and_column() {
        let source = "ab\ncd\nef";
        assert_eq!(get_line_and_column(source, 0), (1, 1));
        assert_eq!(get_line_and_column(source, 4), (2, 2));
        assert_eq!(get_line_and_column(source, 6), (3, 1));
    }

    #[test]
    fn test_line_range_spans_lines() {
        let source = "one\ntwo\nthree\n";
        assert_eq!(line_range(source, 0, 7), (1, 2));
        assert_eq!(line_range(source, 4, 8), (2, 2));
    }

    #[test]
    fn test_longest_run() {
        assert_eq!(longest_run("a ``` b `` c", '`'), 3);
        assert_eq!(longest_run("plain", '`'), 0);
    }
}
