//! Headless review surface reading choices from a terminal.

use std::io::{BufRead, Write};

use log::warn;

use crate::protocol::Choice;
use crate::review_pages::page_count;
use crate::review_surface::{parse_choice, BatchSummary, ChoiceProvider, EntityReview, ReviewError};

pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
    page_size: usize,
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W, page_size: usize) -> Self {
        Self {
            input,
            output,
            page_size: page_size.max(1),
        }
    }

    fn show_page(&mut self, review: &EntityReview, page: usize) -> Result<(), ReviewError> {
        let pages = page_count(review.candidates.len(), self.page_size);
        writeln!(self.output)?;
        writeln!(
            self.output,
            "[{}/{}] {} ({})",
            review.position,
            review.total,
            review.entity.name.trim(),
            review.entity.category.display_name()
        )?;
        if review.unfiltered {
            writeln!(
                self.output,
                "  no candidate resembled the reference image; showing all downloads"
            )?;
        }
        for staged in review
            .candidates
            .iter()
            .skip(page * self.page_size)
            .take(self.page_size)
        {
            let candidate = &staged.candidate;
            writeln!(
                self.output,
                "  {:>2}. {}x{} ratio {:.3} score {:.3}  {}",
                staged.rank,
                candidate.width,
                candidate.height,
                candidate.aspect_ratio,
                candidate.score,
                candidate.title
            )?;
            writeln!(self.output, "      {}", staged.path.display())?;
        }
        write!(
            self.output,
            "page {}/{} - number(s) to select, 0 or s to skip, n/p to page, q to stop: ",
            page + 1,
            pages
        )?;
        self.output.flush()?;
        Ok(())
    }
}

impl<R: BufRead, W: Write> ChoiceProvider for TerminalPrompt<R, W> {
    fn present(&mut self, review: &EntityReview) -> Result<Choice, ReviewError> {
        let pages = page_count(review.candidates.len(), self.page_size);
        let mut page = 0;
        loop {
            self.show_page(review, page)?;

            let mut line = String::new();
            // Closed input stops the batch and leaves the rest pending.
            if self.input.read_line(&mut line)? == 0 {
                writeln!(self.output)?;
                return Ok(Choice::Abort);
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "n" => page = (page + 1) % pages,
                "p" => page = (page + pages - 1) % pages,
                "s" => return Ok(Choice::Skip),
                "q" => return Ok(Choice::Abort),
                input => match parse_choice(input, review.max_rank()) {
                    Ok(choice) => return Ok(choice),
                    Err(reason) => writeln!(self.output, "  {reason}")?,
                },
            }
        }
    }

    fn finish(&mut self, summary: &BatchSummary) {
        let result = (|| -> std::io::Result<()> {
            writeln!(
                self.output,
                "\n{}: {}/{} resolved",
                summary.batch_id,
                summary.resolved(),
                summary.entries.len()
            )?;
            for line in summary.choice_lines() {
                writeln!(self.output, "{line}")?;
            }
            self.output.flush()
        })();
        if let Err(err) = result {
            warn!("Review[{}]: failed to print summary: {}", summary.batch_id, err);
        }
    }
}
