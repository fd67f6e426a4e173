pub mod posting;
pub mod postlist;
pub mod positionlist;
pub mod record;
pub mod termlist;
