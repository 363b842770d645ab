//! Interactive prompts for the restore wizard.
//!
//! Every prompt re-asks until it gets a usable answer and reads from any
//! [`BufRead`], so tests drive them with an in-memory cursor.

use std::io::{self, BufRead, Write};

/// Ask the operator to pick one item from a numbered list.
pub fn select<'a, T>(
    title: &str,
    items: &'a [T],
    label: impl Fn(&T) -> String,
) -> io::Result<&'a T> {
    select_from(&mut io::stdin().lock(), title, items, label)
}

pub fn select_from<'a, R: BufRead, T>(
    reader: &mut R,
    title: &str,
    items: &'a [T],
    label: impl Fn(&T) -> String,
) -> io::Result<&'a T> {
    println!("{title}");
    for (i, item) in items.iter().enumerate() {
        println!("  {}) {}", i + 1, label(item));
    }
    loop {
        print!("> ");
        io::stdout().flush()?;
        let line = read_line(reader)?;
        match line.trim().parse::<usize>() {
            Ok(n) if (1..=items.len()).contains(&n) => return Ok(&items[n - 1]),
            _ => println!("Enter a number between 1 and {}.", items.len()),
        }
    }
}

/// Ask a yes/no question.
pub fn confirm(question: &str) -> io::Result<bool> {
    confirm_from(&mut io::stdin().lock(), question)
}

pub fn confirm_from<R: BufRead>(reader: &mut R, question: &str) -> io::Result<bool> {
    loop {
        print!("{question} [y/n] ");
        io::stdout().flush()?;
        match read_line(reader)?.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => {}
        }
    }
}

/// One line of input. A closed stream is an error so non-interactive runs
/// fail instead of spinning on the re-prompt loop.
fn read_line<R: BufRead>(reader: &mut R) -> io::Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "input closed",
        ));
    }
    Ok(line)
}
