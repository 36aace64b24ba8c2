//! Generated gRPC message and service types for the lab control plane wire protocol.

tonic::include_proto!("jumpstarter.v1");
