mod common;

use std::io::Cursor;

use common::{program_file, PROGRAM, PROGRAM_LINES};
use krusty_printjob::print_job::{ProgramError, ProgramReader};

fn reader(contents: &str) -> ProgramReader<Cursor<Vec<u8>>> {
    ProgramReader::from_reader(Cursor::new(contents.as_bytes().to_vec()), contents.len() as u64)
}

fn lines<R: std::io::BufRead + std::io::Seek>(reader: &mut ProgramReader<R>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line) = reader.next_line().unwrap() {
        lines.push(line);
    }
    lines
}

#[test]
fn skips_blank_and_comment_lines() {
    let mut program = reader("\n; header\n   \nG1 X10 ; move\n;; trailer\n");
    assert_eq!(program.next_line().unwrap().as_deref(), Some("G1 X10"));
    assert_eq!(program.next_line().unwrap(), None);
    assert_eq!(program.position(), program.size());
}

#[test]
fn reports_offset_after_each_line() {
    let mut program = reader(PROGRAM);
    let mut offsets = Vec::new();
    while program.next_line().unwrap().is_some() {
        offsets.push(program.position());
    }
    assert_eq!(offsets, [22, 36, 57, 61]);
    assert_eq!(program.position(), 67);
}

#[test]
fn pins_offset_to_size_when_exhausted() {
    // Declared size larger than the data actually readable.
    let mut program = ProgramReader::from_reader(Cursor::new(b"G28\n".to_vec()), 10);
    assert_eq!(program.next_line().unwrap().as_deref(), Some("G28"));
    assert_eq!(program.position(), 4);
    assert_eq!(program.next_line().unwrap(), None);
    assert_eq!(program.position(), 10);
}

#[test]
fn handles_crlf_and_missing_final_newline() {
    let mut program = reader("G28\r\n\tG1 X1 Y2\t\r\nM84");
    assert_eq!(lines(&mut program), ["G28", "G1 X1 Y2", "M84"]);
    assert_eq!(program.position(), program.size());
}

#[test]
fn keeps_escaped_semicolons() {
    let mut program = reader("M117 Layer\\;1 ; comment\n");
    assert_eq!(lines(&mut program), ["M117 Layer\\;1"]);
}

#[test]
fn rewind_starts_over() {
    let mut program = reader(PROGRAM);
    program.next_line().unwrap();
    program.next_line().unwrap();
    program.rewind().unwrap();
    assert_eq!(program.position(), 0);
    assert_eq!(lines(&mut program), PROGRAM_LINES);
}

#[test]
fn open_reads_file_size() {
    let file = program_file(PROGRAM);
    let mut program = ProgramReader::open(file.path()).unwrap();
    assert_eq!(program.size(), PROGRAM.len() as u64);
    assert_eq!(lines(&mut program), PROGRAM_LINES);
}

#[test]
fn open_fails_for_missing_file() {
    let err = ProgramReader::open("/nonexistent/part.gcode").err().unwrap();
    assert!(matches!(err, ProgramError::ResourceUnavailable { .. }));
    assert!(err.to_string().contains("/nonexistent/part.gcode"));
}
