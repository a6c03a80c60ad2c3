pub mod topk_computer;
pub mod vint;
