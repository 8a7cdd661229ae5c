pub mod fs;
pub mod xdg;
