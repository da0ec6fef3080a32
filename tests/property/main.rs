mod graph;
mod scheduler;
