use std::fmt::Display;

use opencv::core::Mat;
use opencv::prelude::*;

/// 实现 Display trait 用于打印
///
/// Row-by-row display of a CV_64F matrix for logging calibration results.
pub struct MatPrinter<'a>(pub &'a Mat);

impl Display for MatPrinter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rows = self.0.rows();
        let cols = self.0.cols();
        writeln!(f)?;
        for i in 0..rows {
            for j in 0..cols {
                match self.0.at_2d::<f64>(i, j) {
                    Ok(v) => write!(f, "{:12.6}, ", v)?,
                    Err(_) => write!(f, "?, ")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::CV_64F;

    #[test]
    fn prints_every_element() {
        let eye = Mat::eye(2, 2, CV_64F).unwrap().to_mat().unwrap();
        let text = format!("{}", MatPrinter(&eye));
        assert_eq!(text.matches("1.000000").count(), 2);
        assert_eq!(text.matches("0.000000").count(), 2);
    }
}
