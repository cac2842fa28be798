pub mod viewer; // Terminal viewer for a live broadcast
