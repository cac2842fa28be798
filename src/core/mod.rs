pub mod driver; // Move source seam
pub mod rules;
pub mod runner; // Turn loop
