pub mod pgfn;
