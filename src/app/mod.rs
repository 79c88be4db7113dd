// Application boundary: ports implemented by infra/ and apis/
pub mod ports;
